//! Transactional scope stack for one configuration variable.
//! -----------------------------------------------------------
//! Every SET inside a transaction pushes (or merges into) a frame tagged
//! with the nesting level and a scope kind. Exiting a nesting level pops
//! frames at or above it: commit keeps plain-SET values and restores
//! LOCAL/SAVE ones; abort restores the prior value unconditionally. Frames
//! from an inner committed subtransaction migrate into the enclosing
//! level's frame according to a fixed merge table, so any interleaving of
//! SET and SET LOCAL across subtransactions unwinds correctly.

use super::variable::{GucAction, GucVar, SavedValue};

/// Scoping intent recorded on a frame. `SetLocal` is the composite state:
/// a SET at this level was later masked by a LOCAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Set,
    Local,
    SetLocal,
    Save,
}

/// One pending scope of one variable. At most one frame exists per nesting
/// level; same-level operations merge instead of stacking.
#[derive(Clone)]
pub struct StackFrame {
    pub level: u32,
    pub kind: ScopeKind,
    /// Value active when this frame was created.
    pub prior: SavedValue,
    /// For `SetLocal`: the same-level SET value being masked by a LOCAL.
    pub masked: Option<SavedValue>,
}

/// Record the pre-change state before a SET at `level` mutates the
/// variable, merging with an existing same-level frame per the precedence
/// table:
/// - SET absorbs any prior same-level intent (a masked value is dropped);
/// - LOCAL after SET demotes the SET's value into the mask and the frame
///   becomes SetLocal; after anything else it changes nothing;
/// - SAVE never merges into an existing frame.
pub fn push_old_value(var: &mut GucVar, action: GucAction, level: u32) {
    let current = var.saved();
    if let Some(top) = var.stack.last_mut() {
        if top.level >= level {
            match action {
                GucAction::Set => {
                    top.masked = None;
                    top.kind = ScopeKind::Set;
                }
                GucAction::Local => {
                    if top.kind == ScopeKind::Set {
                        top.masked = Some(current);
                        top.kind = ScopeKind::SetLocal;
                    }
                }
                GucAction::Save => {}
            }
            return;
        }
    }
    var.stack.push(StackFrame {
        level,
        kind: match action {
            GucAction::Save => ScopeKind::Save,
            GucAction::Local => ScopeKind::Local,
            GucAction::Set => ScopeKind::Set,
        },
        prior: current,
        masked: None,
    });
}

/// Pop every frame at or above `level` when that nesting level exits.
/// Returns true if the active value changed (the caller emits the
/// parameter-changed report).
pub fn pop_level(var: &mut GucVar, level: u32, is_commit: bool) -> bool {
    let mut changed = false;
    while let Some(top) = var.stack.last() {
        if top.level < level {
            break;
        }
        let mut frame = match var.stack.pop() {
            Some(f) => f,
            None => break,
        };

        if !is_commit {
            // Abort restores the prior value unconditionally.
            changed |= var.install(frame.prior);
            continue;
        }

        match frame.kind {
            ScopeKind::Save => {
                changed |= var.install(frame.prior);
            }
            _ if frame.level == 1 => {
                // Top-level commit: SET keeps the active value; LOCAL and
                // SetLocal are transaction-scoped and roll back.
                match frame.kind {
                    ScopeKind::Set => {}
                    ScopeKind::Local | ScopeKind::SetLocal => {
                        changed |= var.install(frame.prior);
                    }
                    ScopeKind::Save => unreachable!(),
                }
            }
            _ => {
                // Subtransaction commit: migrate the frame down a level,
                // merging into an existing enclosing frame if one is there.
                let merges = var
                    .stack
                    .last()
                    .map(|p| p.level == frame.level - 1)
                    .unwrap_or(false);
                if !merges {
                    frame.level -= 1;
                    var.stack.push(frame);
                    continue;
                }
                let prev = match var.stack.last_mut() {
                    Some(p) => p,
                    None => continue,
                };
                match frame.kind {
                    ScopeKind::Set => {
                        // inner SET wins at the outer level too
                        prev.masked = None;
                        prev.kind = ScopeKind::Set;
                    }
                    ScopeKind::Local => {
                        if prev.kind == ScopeKind::Set {
                            // LOCAL migrates down and masks the outer SET;
                            // the mask is the value the LOCAL displaced.
                            prev.masked = Some(frame.prior);
                            prev.kind = ScopeKind::SetLocal;
                        }
                        // otherwise the inner LOCAL is simply forgotten
                    }
                    ScopeKind::SetLocal => {
                        prev.masked = frame.masked;
                        prev.kind = ScopeKind::SetLocal;
                    }
                    ScopeKind::Save => unreachable!(),
                }
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guc::value::GucValue;
    use crate::guc::variable::{GucContext, GucKind, GucSource};

    fn var(initial: &str) -> GucVar {
        GucVar::new(
            "x",
            "test variable",
            GucContext::UserSet,
            GucKind::Str,
            GucValue::Str(initial.into()),
        )
    }

    fn set(v: &mut GucVar, value: &str, action: GucAction, level: u32) {
        push_old_value(v, action, level);
        v.value = GucValue::Str(value.into());
        v.source = GucSource::Session;
    }

    fn text(v: &GucVar) -> String {
        v.value.as_text()
    }

    #[test]
    fn plain_set_survives_commit() {
        let mut v = var("base");
        set(&mut v, "A", GucAction::Set, 1);
        pop_level(&mut v, 1, true);
        assert_eq!(text(&v), "A");
        assert!(v.stack.is_empty());
    }

    #[test]
    fn plain_set_rolls_back_on_abort() {
        let mut v = var("base");
        set(&mut v, "A", GucAction::Set, 1);
        pop_level(&mut v, 1, false);
        assert_eq!(text(&v), "base");
    }

    #[test]
    fn local_rolls_back_even_on_commit() {
        let mut v = var("base");
        set(&mut v, "B", GucAction::Local, 1);
        assert_eq!(text(&v), "B");
        pop_level(&mut v, 1, true);
        assert_eq!(text(&v), "base");
    }

    #[test]
    fn set_then_local_commit_and_abort_restore_base() {
        for is_commit in [true, false] {
            let mut v = var("base");
            set(&mut v, "A", GucAction::Set, 1);
            set(&mut v, "B", GucAction::Local, 1);
            assert_eq!(v.stack.len(), 1);
            assert_eq!(v.stack[0].kind, ScopeKind::SetLocal);
            pop_level(&mut v, 1, is_commit);
            assert_eq!(text(&v), "base");
        }
    }

    #[test]
    fn local_then_set_commit_keeps_set() {
        let mut v = var("base");
        set(&mut v, "B", GucAction::Local, 1);
        set(&mut v, "A", GucAction::Set, 1);
        // SET absorbed the frame: plain Set intent remains
        assert_eq!(v.stack[0].kind, ScopeKind::Set);
        pop_level(&mut v, 1, true);
        assert_eq!(text(&v), "A");
    }

    #[test]
    fn subtransaction_abort_restores_inner_prior() {
        let mut v = var("base");
        set(&mut v, "A", GucAction::Set, 1);
        set(&mut v, "B", GucAction::Set, 2);
        pop_level(&mut v, 2, false);
        assert_eq!(text(&v), "A");
        pop_level(&mut v, 1, true);
        assert_eq!(text(&v), "A");
    }

    #[test]
    fn subtransaction_commit_migrates_set_down() {
        let mut v = var("base");
        set(&mut v, "B", GucAction::Set, 2);
        pop_level(&mut v, 2, true);
        // frame migrated to level 1 rather than being applied
        assert_eq!(v.stack.len(), 1);
        assert_eq!(v.stack[0].level, 1);
        assert_eq!(text(&v), "B");
        pop_level(&mut v, 1, false);
        assert_eq!(text(&v), "base");
    }

    #[test]
    fn inner_set_merges_into_outer_frame() {
        let mut v = var("base");
        set(&mut v, "A", GucAction::Local, 1);
        set(&mut v, "B", GucAction::Set, 2);
        pop_level(&mut v, 2, true);
        assert_eq!(v.stack.len(), 1);
        // inner SET overrides the outer LOCAL intent
        assert_eq!(v.stack[0].kind, ScopeKind::Set);
        pop_level(&mut v, 1, true);
        assert_eq!(text(&v), "B");
    }

    #[test]
    fn inner_local_masks_outer_set() {
        let mut v = var("base");
        set(&mut v, "A", GucAction::Set, 1);
        set(&mut v, "B", GucAction::Local, 2);
        pop_level(&mut v, 2, true);
        assert_eq!(v.stack[0].kind, ScopeKind::SetLocal);
        assert_eq!(text(&v), "B");
        // transaction-scoped overall: base comes back at top-level end
        pop_level(&mut v, 1, true);
        assert_eq!(text(&v), "base");
    }

    #[test]
    fn save_restores_on_both_paths() {
        for is_commit in [true, false] {
            let mut v = var("base");
            set(&mut v, "fn-scope", GucAction::Save, 3);
            assert_eq!(text(&v), "fn-scope");
            pop_level(&mut v, 3, is_commit);
            assert_eq!(text(&v), "base");
        }
    }

    #[test]
    fn multi_level_unwind_in_one_pop() {
        let mut v = var("base");
        set(&mut v, "A", GucAction::Set, 2);
        set(&mut v, "B", GucAction::Set, 3);
        set(&mut v, "C", GucAction::Set, 4);
        // abort the whole tree down to level 2
        pop_level(&mut v, 2, false);
        assert_eq!(text(&v), "base");
        assert!(v.stack.is_empty());
    }
}
