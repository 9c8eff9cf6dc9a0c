//! Routes each inbound message to its output block and renders it.

use serde_json::Value;
use tracing::{debug, info, warn};

use singlecell_core::ids::{BlockId, InteractId, MsgId};
use singlecell_core::markup::{escape_attr, escape_html};
use singlecell_core::protocol::{Extension, Message, MessageBody};
use singlecell_interact::InteractCell;

use crate::render::RenderSurface;
use crate::session::{Session, SessionState};
use crate::transport::Transport;

impl<T: Transport, S: RenderSurface> Session<T, S> {
    /// The block a message renders into: an explicit known `output_block`,
    /// then the block routed to its parent request, then the session block.
    pub(crate) fn block_for(&self, message: &Message) -> BlockId {
        if let Some(block) = message.output_block.as_ref() {
            if self.blocks.contains(block) {
                return block.clone();
            }
        }
        message
            .parent_msg_id
            .as_ref()
            .and_then(|msg_id| self.routes.get(msg_id))
            .cloned()
            .unwrap_or_else(|| self.session_block())
    }

    pub(crate) fn dispatch(&mut self, message: &Message) {
        let block = self.block_for(message);
        debug!(session_id = %self.id, msg_type = %message.body.tag(), %block, "Dispatching");
        match &message.body {
            MessageBody::Stream { name, data } => {
                let class = name.as_deref().unwrap_or("stdout");
                let fragment = format!(
                    "<pre class=\"{}\">{}</pre>",
                    escape_attr(class),
                    escape_html(data.as_deref().unwrap_or_default())
                );
                self.emit(&block, &fragment);
            }
            MessageBody::Pyout { text } => {
                let fragment = format!(
                    "<pre class=\"pyout\">{}</pre>",
                    escape_html(text.as_deref().unwrap_or_default())
                );
                self.emit(&block, &fragment);
            }
            MessageBody::DisplayData { svg, html } => {
                if let Some(svg) = svg {
                    self.emit(&block, &format!("<div class=\"svg\">{svg}</div>"));
                } else if let Some(html) = html {
                    self.emit(&block, &format!("<div>{html}</div>"));
                }
            }
            MessageBody::Pyerr { traceback } => {
                self.render_traceback(&block, traceback.as_deref());
            }
            MessageBody::ExecuteReply { status, traceback } => {
                if status.as_deref() == Some("error") {
                    self.render_traceback(&block, traceback.as_deref());
                }
                self.poller.reschedule(self.settings.idle_interval);
            }
            MessageBody::Extension(Extension::Files { files }) => {
                self.render_files(&block, files.as_deref().unwrap_or_default());
            }
            MessageBody::Extension(Extension::SessionEnd) => self.end_session(),
            MessageBody::Extension(Extension::InteractPrepare { interact_id, payload }) => {
                let parent_msg_id = message.parent_msg_id.as_ref();
                self.prepare_interact(&block, interact_id.as_ref(), parent_msg_id, payload);
            }
            MessageBody::Extension(Extension::Unknown { msg_type }) => {
                debug!(session_id = %self.id, ?msg_type, "Ignoring unknown extension");
            }
            MessageBody::Unknown { msg_type } => {
                debug!(session_id = %self.id, ?msg_type, "Ignoring unknown message type");
            }
        }
    }

    fn render_traceback(&mut self, block: &BlockId, traceback: Option<&[String]>) {
        let text = traceback.map(|lines| lines.join("\n")).unwrap_or_default();
        let fragment = format!(
            "<pre class=\"traceback\">{}</pre>",
            self.colorizer.colorize(&escape_html(&text))
        );
        self.emit(block, &fragment);
    }

    fn render_files(&mut self, block: &BlockId, files: &[String]) {
        let base = self.settings.files_path.trim_end_matches('/');
        let session = escape_attr(self.id.as_str());
        let mut fragment = String::from("<div class=\"files\"><ol>");
        for file in files {
            fragment.push_str(&format!(
                "<li><a href=\"{base}/{session}/{}\" target=\"_blank\">{}</a></li>",
                escape_attr(file),
                escape_html(file)
            ));
        }
        fragment.push_str("</ol></div>");
        self.emit(block, &fragment);
    }

    fn end_session(&mut self) {
        if self.state == SessionState::Done {
            return;
        }
        let block = self.session_block();
        self.surface.append(
            &block,
            &format!("<div class=\"done\">Session {} done</div>", escape_html(self.id.as_str())),
        );
        let removed = self.registry.unsubscribe_all();
        self.state = SessionState::Done;
        self.poller.stop();
        let elapsed_ms = (chrono::Utc::now() - self.created_at()).num_milliseconds();
        info!(
            session_id = %self.id,
            unsubscribed = removed,
            cursor = self.cursor,
            elapsed_ms,
            "Session done"
        );
    }

    fn prepare_interact(
        &mut self,
        parent: &BlockId,
        interact_id: Option<&InteractId>,
        msg_id: Option<&MsgId>,
        payload: &Value,
    ) {
        if self.state == SessionState::Done {
            debug!(session_id = %self.id, "Ignoring interact_prepare after session end");
            return;
        }
        let (Some(interact_id), Some(msg_id)) = (interact_id, msg_id) else {
            warn!(session_id = %self.id, "interact_prepare without interact id or parent msg_id");
            return;
        };

        let cell = InteractCell::from_prepare(
            interact_id.clone(),
            msg_id.clone(),
            payload,
            &self.settings.function_template,
        );
        self.emit(parent, &cell.render_html());

        let block = BlockId::from(interact_id);
        self.surface.create_block(&block, Some(parent));
        self.blocks.insert(block.clone());
        if &block != parent {
            self.parents.insert(block.clone(), parent.clone());
        }
        self.routes.insert(msg_id.clone(), block);

        if self.registry.unsubscribe_scope(interact_id) > 0 {
            debug!(%interact_id, "Replacing existing interact");
        }
        for (control, event) in cell.subscriptions() {
            self.registry.subscribe(interact_id, &control, event);
        }
        info!(
            session_id = %self.id,
            %interact_id,
            controls = cell.controls().len(),
            "Interact prepared"
        );
        self.interacts.insert(interact_id.clone(), cell);
    }
}
