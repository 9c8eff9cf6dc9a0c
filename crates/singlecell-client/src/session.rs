//! Session state machine: Created → Active → Done.
//!
//! A session owns its identity, sequence cursor, poll timer, interact cells,
//! and their subscriptions. It suspends only on the transport's submit and
//! poll; each returned batch is dispatched to completion before the next
//! suspension.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use singlecell_core::config::Config;
use singlecell_core::error::{Result, SingleCellError};
use singlecell_core::ids::{BlockId, IdGenerator, InteractId, MsgId, SessionId, Uuid4Generator};
use singlecell_core::markup::{AnsiColorizer, Colorizer, escape_html};
use singlecell_core::protocol::{ExecMode, ExecuteRequest, Message, PollBatch};
use singlecell_interact::{ControlValue, EventKind, InteractCell};

use crate::polling::{self, PollController};
use crate::registry::EventHandlerRegistry;
use crate::render::RenderSurface;
use crate::transport::Transport;

const MISMATCH_NOTICE: &str =
    "<div class=\"warning\">Session id returned and session id sent don't match up</div>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Active,
    Done,
}

/// Per-session knobs, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub mode: ExecMode,
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub files_path: String,
    pub function_template: String,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            mode: config.exec_mode(),
            active_interval: config.active_interval(),
            idle_interval: config.idle_interval(),
            files_path: config.files_path(),
            function_template: config.function_template().to_string(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

/// A user interaction with one interact control.
#[derive(Debug, Clone)]
pub struct ControlEvent {
    pub interact_id: InteractId,
    pub control: String,
    pub event: EventKind,
    /// New value, when the event carries one.
    pub value: Option<ControlValue>,
}

/// External input to a running session.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Submit { code: String },
    Control(ControlEvent),
}

pub struct Session<T, S> {
    pub(crate) id: SessionId,
    pub(crate) state: SessionState,
    pub(crate) cursor: u64,
    pub(crate) settings: SessionSettings,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) colorizer: Box<dyn Colorizer>,
    transport: T,
    pub(crate) poller: PollController,
    pub(crate) registry: EventHandlerRegistry,
    pub(crate) interacts: HashMap<InteractId, InteractCell>,
    pub(crate) routes: HashMap<MsgId, BlockId>,
    pub(crate) blocks: HashSet<BlockId>,
    /// Interact block → the block it is nested in.
    pub(crate) parents: HashMap<BlockId, BlockId>,
    pub(crate) replace_next: Option<BlockId>,
    pub(crate) surface: S,
    message_log: Vec<Value>,
    created_at: DateTime<Utc>,
}

impl<T: Transport, S: RenderSurface> Session<T, S> {
    pub fn new(settings: SessionSettings, transport: T, surface: S) -> Self {
        Self::with_ids(settings, transport, surface, Arc::new(Uuid4Generator))
    }

    /// Use `ids` for the session, message, and fallback identities.
    pub fn with_ids(
        settings: SessionSettings,
        transport: T,
        surface: S,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let id = SessionId::generate(ids.as_ref());
        let poller = PollController::new(settings.active_interval);
        Self {
            id,
            state: SessionState::Created,
            cursor: 0,
            settings,
            ids,
            colorizer: Box::new(AnsiColorizer),
            transport,
            poller,
            registry: EventHandlerRegistry::new(),
            interacts: HashMap::new(),
            routes: HashMap::new(),
            blocks: HashSet::new(),
            parents: HashMap::new(),
            replace_next: None,
            surface,
            message_log: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn set_colorizer(&mut self, colorizer: Box<dyn Colorizer>) {
        self.colorizer = colorizer;
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == SessionState::Done
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn poller(&self) -> &PollController {
        &self.poller
    }

    pub fn registry(&self) -> &EventHandlerRegistry {
        &self.registry
    }

    pub fn interact(&self, id: &InteractId) -> Option<&InteractCell> {
        self.interacts.get(id)
    }

    pub fn interacts(&self) -> impl Iterator<Item = &InteractCell> {
        self.interacts.values()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Raw JSON of every inbound message processed so far.
    pub fn message_log(&self) -> &[Value] {
        &self.message_log
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The session's own output block.
    pub fn session_block(&self) -> BlockId {
        BlockId::from(&self.id)
    }

    fn activate(&mut self) {
        let block = self.session_block();
        self.surface.create_block(&block, None);
        self.blocks.insert(block.clone());
        self.surface.append(
            &block,
            &format!(
                "<div class=\"session_title\">Session {}</div>",
                escape_html(self.id.as_str())
            ),
        );
        self.state = SessionState::Active;
        self.poller.start(self.settings.active_interval);
        info!(session_id = %self.id, "Session active");
    }

    /// Render `fragment` into `block`, honoring a pending one-shot replace for it.
    pub(crate) fn emit(&mut self, block: &BlockId, fragment: &str) {
        if self.replace_next.as_ref() == Some(block) {
            self.replace_next = None;
            self.drop_children(block);
            self.surface.replace(block, fragment);
        } else {
            self.surface.append(block, fragment);
        }
    }

    /// Forget the interact blocks nested in `block`, with their cells and
    /// subscriptions. Requests routed to them fall back to `block`.
    fn drop_children(&mut self, block: &BlockId) {
        let children: Vec<BlockId> = self
            .parents
            .iter()
            .filter(|(_, parent)| *parent == block)
            .map(|(child, _)| child.clone())
            .collect();
        for child in children {
            self.drop_children(&child);
            self.parents.remove(&child);
            self.blocks.remove(&child);
            let interact_id = InteractId::from(child.as_str());
            self.interacts.remove(&interact_id);
            let removed = self.registry.unsubscribe_scope(&interact_id);
            for target in self.routes.values_mut() {
                if *target == child {
                    *target = block.clone();
                }
            }
            debug!(
                session_id = %self.id,
                %interact_id,
                unsubscribed = removed,
                "Dropped nested interact"
            );
        }
    }

    /// Submit code. `msg_id` is reused when given (interact resubmission),
    /// otherwise generated. On success, polls immediately.
    pub async fn submit(&mut self, code: &str, msg_id: Option<MsgId>) -> Result<MsgId> {
        if self.state == SessionState::Done {
            return Err(SingleCellError::SessionDone(self.id.to_string()));
        }

        let request = ExecuteRequest::new(
            &self.id,
            code,
            self.settings.mode,
            msg_id,
            self.ids.as_ref(),
        );
        let msg_id = request.msg_id().clone();

        let ack = match self.transport.submit(&request).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(session_id = %self.id, msg_id = %msg_id, %e, "Submit failed");
                return Err(e);
            }
        };
        debug!(session_id = %self.id, msg_id = %msg_id, "Submitted");
        if self.state == SessionState::Created {
            self.activate();
        }
        let session_block = self.session_block();
        self.routes.entry(msg_id.clone()).or_insert(session_block);

        if let Some(computation_id) = ack.computation_id.as_deref() {
            if computation_id != self.id.as_str() {
                warn!(
                    session_id = %self.id,
                    computation_id,
                    "Server returned a different computation id"
                );
                let block = self.session_block();
                self.surface.append(&block, MISMATCH_NOTICE);
            }
        }

        if let Err(e) = self.poll().await {
            debug!(session_id = %self.id, %e, "Initial poll failed; waiting for the next event");
        }
        Ok(msg_id)
    }

    /// Fetch and process everything from the cursor on. Returns the number of messages processed.
    pub async fn poll(&mut self) -> Result<usize> {
        if self.state != SessionState::Active {
            return Ok(0);
        }
        self.poller.disarm();

        match self.transport.poll(&self.id, self.cursor).await {
            Ok(batch) => Ok(self.process_batch(batch)),
            Err(e) => {
                // No retry: the session stalls until the next submit or control event.
                warn!(session_id = %self.id, sequence = self.cursor, %e, "Poll failed");
                Err(e)
            }
        }
    }

    /// Dispatch a batch in array order, then arm the next poll exactly once.
    pub fn process_batch(&mut self, batch: PollBatch) -> usize {
        let count = batch.messages.len();
        for message in &batch.messages {
            self.process_message(message);
        }
        if self.state == SessionState::Active {
            self.poller.schedule();
        }
        count
    }

    fn process_message(&mut self, message: &Message) {
        if let Some(sequence) = message.sequence {
            if sequence != self.cursor {
                warn!(
                    session_id = %self.id,
                    expected = self.cursor,
                    reported = sequence,
                    "Sequence out of order"
                );
            }
        }
        self.cursor += 1;
        self.message_log.push(message.raw.clone());
        self.dispatch(message);
    }

    /// Apply a control event; if it is a subscribed trigger, resubmit the
    /// interact's call under its original request id and mark the interact
    /// block for replacement.
    pub async fn handle_control_event(&mut self, event: ControlEvent) -> Result<Option<MsgId>> {
        if !self.registry.has_scope(&event.interact_id) {
            debug!(interact_id = %event.interact_id, "Event for an unsubscribed interact");
            return Ok(None);
        }
        let cell = self
            .interacts
            .get_mut(&event.interact_id)
            .ok_or_else(|| SingleCellError::UnknownInteract(event.interact_id.to_string()))?;

        let Some(resubmit) = cell.handle_event(&event.control, event.event, event.value)? else {
            return Ok(None);
        };
        if !self.registry.is_subscribed(&event.interact_id, &event.control, event.event) {
            return Ok(None);
        }

        let block = BlockId::from(&event.interact_id);
        self.routes.insert(resubmit.msg_id.clone(), block.clone());
        self.replace_next = Some(block);
        match self.submit(&resubmit.code, Some(resubmit.msg_id)).await {
            Ok(msg_id) => Ok(Some(msg_id)),
            Err(e) => {
                self.replace_next = None;
                Err(e)
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        let result = match command {
            SessionCommand::Submit { code } => self.submit(&code, None).await.map(Some),
            SessionCommand::Control(event) => self.handle_control_event(event).await,
        };
        if let Err(e) = result {
            warn!(session_id = %self.id, %e, "Command failed");
        }
    }

    /// Drive the session until it is done, or until `commands` closes with no poll pending.
    pub async fn run(&mut self, mut commands: mpsc::UnboundedReceiver<SessionCommand>) {
        let mut commands_open = true;
        while !self.is_done() {
            let deadline = self.poller.deadline();
            if deadline.is_none() && !commands_open {
                break;
            }
            tokio::select! {
                _ = polling::wait_for(deadline) => {
                    let _ = self.poll().await;
                }
                command = commands.recv(), if commands_open => match command {
                    Some(command) => self.handle_command(command).await,
                    None => commands_open = false,
                },
            }
        }
        debug!(
            session_id = %self.id,
            state = ?self.state,
            cursor = self.cursor,
            "Session loop exited"
        );
    }
}
