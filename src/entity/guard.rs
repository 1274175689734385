use super::Entity;
use crate::core::Result;
use log::warn;
use std::ops::Deref;

/// Scoped owner that persists pending changes when the scope ends.
///
/// `close()` saves and reports failures. A guard dropped without `close()`
/// saves only when the table was configured with `auto_save`, and any failure
/// at that point is logged and swallowed. Code that never creates a guard
/// never gets auto-save; entities do no I/O when dropped.
pub struct AutoSaveGuard {
    entity: Entity,
    closed: bool,
}

impl AutoSaveGuard {
    pub fn new(entity: Entity) -> Self {
        Self {
            entity,
            closed: false,
        }
    }

    pub fn entity(&self) -> &Entity {
        &self.entity
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.entity.save()
    }
}

impl Deref for AutoSaveGuard {
    type Target = Entity;

    fn deref(&self) -> &Entity {
        &self.entity
    }
}

impl Drop for AutoSaveGuard {
    fn drop(&mut self) {
        if self.closed || !self.entity.table().config().auto_save {
            return;
        }
        if let Err(err) = self.entity.save() {
            warn!(
                "auto-save of '{}' entity {:?} failed: {}",
                self.entity.table().name(),
                self.entity.id(),
                err
            );
        }
    }
}
