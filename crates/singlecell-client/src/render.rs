//! Rendering surface for output blocks.

use std::collections::HashMap;

use singlecell_core::ids::BlockId;
use singlecell_core::markup::escape_attr;

/// Where a session puts rendered fragments.
pub trait RenderSurface: Send {
    /// Create `block`, nested in `parent` or top-level. Creating an existing block is a no-op.
    fn create_block(&mut self, block: &BlockId, parent: Option<&BlockId>);

    /// Append a fragment to `block`.
    fn append(&mut self, block: &BlockId, fragment: &str);

    /// Clear `block`'s content, nested blocks included, then set `fragment` as its content.
    fn replace(&mut self, block: &BlockId, fragment: &str);
}

#[derive(Debug, Clone)]
enum Item {
    Fragment(String),
    Block(BlockId),
}

/// In-memory HTML document. Blocks render as nested `<div>`s in creation order.
#[derive(Debug, Default)]
pub struct HtmlDocument {
    roots: Vec<BlockId>,
    blocks: HashMap<BlockId, Vec<Item>>,
}

impl HtmlDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, block: &BlockId) -> bool {
        self.blocks.contains_key(block)
    }

    /// Fragments directly inside `block`, in order.
    pub fn fragments(&self, block: &BlockId) -> Vec<&str> {
        self.blocks
            .get(block)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Item::Fragment(f) => Some(f.as_str()),
                        Item::Block(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Blocks nested directly inside `block`, in order.
    pub fn children(&self, block: &BlockId) -> Vec<&BlockId> {
        self.blocks
            .get(block)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Item::Block(b) => Some(b),
                        Item::Fragment(_) => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn to_html(&self) -> String {
        let mut out = String::new();
        for root in &self.roots {
            self.write_block(root, &mut out);
        }
        out
    }

    fn write_block(&self, block: &BlockId, out: &mut String) {
        out.push_str(&format!(
            "<div class=\"output-block\" id=\"{}\">",
            escape_attr(block.as_str())
        ));
        for item in self.blocks.get(block).into_iter().flatten() {
            match item {
                Item::Fragment(f) => out.push_str(f),
                Item::Block(child) => self.write_block(child, out),
            }
        }
        out.push_str("</div>");
    }

    fn remove_tree(&mut self, block: &BlockId) {
        for item in self.blocks.remove(block).into_iter().flatten() {
            if let Item::Block(child) = item {
                self.remove_tree(&child);
            }
        }
    }

    fn ensure(&mut self, block: &BlockId) -> &mut Vec<Item> {
        if !self.blocks.contains_key(block) {
            self.roots.push(block.clone());
        }
        self.blocks.entry(block.clone()).or_default()
    }
}

impl RenderSurface for HtmlDocument {
    fn create_block(&mut self, block: &BlockId, parent: Option<&BlockId>) {
        if self.blocks.contains_key(block) {
            return;
        }
        match parent {
            Some(parent) => {
                self.ensure(parent).push(Item::Block(block.clone()));
                self.blocks.insert(block.clone(), Vec::new());
            }
            None => {
                self.ensure(block);
            }
        }
    }

    fn append(&mut self, block: &BlockId, fragment: &str) {
        self.ensure(block).push(Item::Fragment(fragment.to_string()));
    }

    fn replace(&mut self, block: &BlockId, fragment: &str) {
        let items = std::mem::take(self.ensure(block));
        for item in items {
            if let Item::Block(child) = item {
                self.remove_tree(&child);
            }
        }
        self.ensure(block).push(Item::Fragment(fragment.to_string()));
    }
}
