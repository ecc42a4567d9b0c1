//! Effects binding state to document nodes.
//!
//! Each binding holds its target weakly and stops being live once the target
//! is gone or no longer connected. A removed subtree therefore does not need
//! to be walked: its bindings retire themselves the next time they are
//! triggered.

use std::rc::Weak;

use crate::dom::{PropValue, WeakDomNode};
use crate::effect::Effect;
use crate::state::Get;
use crate::view::Generator;

use super::rendered::{ListCell, ZoneCell};

fn connected(node: &WeakDomNode) -> bool {
    node.upgrade().is_some_and(|node| node.is_connected())
}

pub(crate) struct TextBinding {
    pub node: WeakDomNode,
    pub generator: Generator<String>,
}

impl Effect for TextBinding {
    fn init(&mut self, get: &mut Get<'_>) {
        let text = (self.generator)(get);
        if let Some(node) = self.node.upgrade() {
            node.set_text(&text);
        }
    }

    fn is_live(&self) -> bool {
        connected(&self.node)
    }
}

pub(crate) struct AttrBinding {
    pub node: WeakDomNode,
    pub name: String,
    pub generator: Generator<Option<String>>,
}

impl Effect for AttrBinding {
    fn init(&mut self, get: &mut Get<'_>) {
        let value = (self.generator)(get);
        let Some(node) = self.node.upgrade() else {
            return;
        };
        match value {
            Some(value) => node.set_attribute(&self.name, &value),
            None => node.remove_attribute(&self.name),
        }
    }

    fn is_live(&self) -> bool {
        connected(&self.node)
    }
}

pub(crate) struct PropBinding {
    pub node: WeakDomNode,
    pub name: String,
    pub generator: Generator<PropValue>,
}

impl Effect for PropBinding {
    fn init(&mut self, get: &mut Get<'_>) {
        let value = (self.generator)(get);
        if let Some(node) = self.node.upgrade() {
            node.set_property(&self.name, value);
        }
    }

    fn is_live(&self) -> bool {
        connected(&self.node)
    }
}

pub(crate) struct ZoneBinding {
    pub cell: Weak<ZoneCell>,
}

impl Effect for ZoneBinding {
    fn init(&mut self, get: &mut Get<'_>) {
        if let Some(cell) = self.cell.upgrade() {
            cell.refresh(get);
        }
    }

    fn is_live(&self) -> bool {
        self.cell
            .upgrade()
            .is_some_and(|cell| cell.anchor().is_connected())
    }
}

pub(crate) struct ListBinding {
    pub cell: Weak<ListCell>,
}

impl Effect for ListBinding {
    fn init(&mut self, get: &mut Get<'_>) {
        if let Some(cell) = self.cell.upgrade() {
            cell.refresh(get);
        }
    }

    fn is_live(&self) -> bool {
        self.cell
            .upgrade()
            .is_some_and(|cell| cell.anchor().is_connected())
    }
}
