//! Per-actor latches that keep multi-stage commands atomic.
//!
//! A command that needs several consumer steps latches every actor it
//! touches before issuing its first mesh request. Any later command that
//! targets a latched actor is parked behind that latch. When the holder
//! finishes (or the actor is removed) the latch is released and each parked
//! command whose last outstanding latch this was is pushed onto the freed
//! queue, which the scheduler drains before the next inbound message.
//!
//! Acquisition order: a holder latches all of its targets, in target order,
//! within a single consumer step. A holder never parks on its own latch.

use std::collections::{HashMap, VecDeque};

use super::actor::ActorId;
use super::command::{CommandId, CommandKind};

/// Counts outstanding waits. Reports readiness exactly once per cycle, on
/// the transition from one to zero, and never goes below zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DelayCounter {
    outstanding: u32,
}

impl DelayCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_count(outstanding: u32) -> Self {
        Self { outstanding }
    }

    pub fn add_delay(&mut self) {
        self.outstanding += 1;
    }

    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }

    pub fn is_clear(&self) -> bool {
        self.outstanding == 0
    }

    pub fn remove_wait_and_check_ready(&mut self) -> bool {
        match self.outstanding {
            0 => false,
            1 => {
                self.outstanding = 0;
                true
            }
            _ => {
                self.outstanding -= 1;
                false
            }
        }
    }
}

#[derive(Debug)]
struct ParkedSlot {
    command: CommandId,
    targets: Vec<ActorId>,
}

#[derive(Debug)]
struct Latch {
    holder: CommandId,
    parked: Vec<ParkedSlot>,
    /// Newest cullable parked command per kind, as an index into `parked`
    top_cullables: HashMap<CommandKind, usize>,
}

impl Latch {
    fn new(holder: CommandId) -> Self {
        Self {
            holder,
            parked: Vec::new(),
            top_cullables: HashMap::new(),
        }
    }
}

/// Result of checking one target of a command against its latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// The target is not latched by another command
    Clear,
    Parked,
    /// Took the place of an older equivalent command, which must be discarded
    Replaced(CommandId),
}

#[derive(Debug, Default)]
pub struct DelayCoordinator {
    latches: HashMap<ActorId, Latch>,
    waits: HashMap<CommandId, DelayCounter>,
    freed: VecDeque<CommandId>,
}

impl DelayCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latches every actor in `actors` for `holder`. Returns the actors
    /// actually acquired; one already held by another command is left alone.
    pub fn begin_delay(&mut self, holder: CommandId, actors: &[ActorId]) -> Vec<ActorId> {
        let mut acquired = Vec::with_capacity(actors.len());
        for &actor in actors {
            match self.latches.get(&actor) {
                None => {
                    self.latches.insert(actor, Latch::new(holder));
                    acquired.push(actor);
                }
                Some(latch) if latch.holder == holder => {}
                Some(latch) => {
                    log::error!(
                        "[DelayCoordinator] {} cannot latch {}: held by {}",
                        holder,
                        actor,
                        latch.holder
                    );
                }
            }
        }
        log::trace!("[DelayCoordinator] {} latched {:?}", holder, acquired);
        acquired
    }

    /// Releases the latches `holder` holds on `actors`.
    pub fn end_delay(&mut self, holder: CommandId, actors: &[ActorId]) {
        for actor in actors {
            let held = self
                .latches
                .get(actor)
                .is_some_and(|latch| latch.holder == holder);
            if held {
                if let Some(latch) = self.latches.remove(actor) {
                    self.release(latch);
                }
            }
        }
    }

    /// Releases the latch on a removed actor, whoever holds it.
    pub fn release_actor(&mut self, actor: ActorId) {
        if let Some(latch) = self.latches.remove(&actor) {
            log::debug!("[DelayCoordinator] {} removed while latched by {}", actor, latch.holder);
            self.release(latch);
        }
    }

    /// Releases every latch `holder` still owns. Used when a command is
    /// discarded without reaching its final stage.
    pub fn release_holder(&mut self, holder: CommandId) -> usize {
        let held: Vec<ActorId> = self
            .latches
            .iter()
            .filter(|(_, latch)| latch.holder == holder)
            .map(|(actor, _)| *actor)
            .collect();
        for actor in &held {
            if let Some(latch) = self.latches.remove(actor) {
                self.release(latch);
            }
        }
        held.len()
    }

    fn release(&mut self, latch: Latch) {
        for slot in latch.parked {
            let ready = self
                .waits
                .get_mut(&slot.command)
                .is_some_and(|counter| counter.remove_wait_and_check_ready());
            if ready {
                self.waits.remove(&slot.command);
                self.freed.push_back(slot.command);
            }
        }
    }

    /// Parks `command` behind the latch on `target` if another command holds it.
    ///
    /// `targets` is the command's full ordered target list; a cullable
    /// command replaces an older parked command of the same kind with an
    /// identical list instead of queuing behind it.
    pub fn check_add_delay(
        &mut self,
        command: CommandId,
        kind: CommandKind,
        cullable: bool,
        targets: &[ActorId],
        target: ActorId,
    ) -> ParkOutcome {
        let Some(latch) = self.latches.get_mut(&target) else {
            return ParkOutcome::Clear;
        };
        if latch.holder == command {
            return ParkOutcome::Clear;
        }
        if latch.parked.last().is_some_and(|slot| slot.command == command) {
            return ParkOutcome::Parked;
        }

        if cullable {
            if let Some(&pos) = latch.top_cullables.get(&kind) {
                let slot = &mut latch.parked[pos];
                if slot.targets == targets {
                    let old = std::mem::replace(&mut slot.command, command);
                    self.waits.entry(command).or_default().add_delay();
                    return ParkOutcome::Replaced(old);
                }
            }
        }

        latch.parked.push(ParkedSlot {
            command,
            targets: targets.to_vec(),
        });
        if cullable {
            latch.top_cullables.insert(kind, latch.parked.len() - 1);
        }
        self.waits.entry(command).or_default().add_delay();
        ParkOutcome::Parked
    }

    /// Drops all bookkeeping for a culled command.
    pub fn forget(&mut self, command: CommandId) {
        self.waits.remove(&command);
    }

    pub fn pop_freed(&mut self) -> Option<CommandId> {
        self.freed.pop_front()
    }

    pub fn holder(&self, actor: ActorId) -> Option<CommandId> {
        self.latches.get(&actor).map(|latch| latch.holder)
    }

    pub fn is_latched(&self, actor: ActorId) -> bool {
        self.latches.contains_key(&actor)
    }

    /// Commands currently waiting on at least one latch
    pub fn parked_count(&self) -> usize {
        self.waits.len()
    }

    pub fn latch_count(&self) -> usize {
        self.latches.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::arena::Arena;

    fn actors(n: usize) -> Vec<ActorId> {
        let mut arena = Arena::new();
        (0..n).map(|_| ActorId(arena.insert(()))).collect()
    }

    #[test]
    fn test_counter_reports_ready_once() {
        let mut counter = DelayCounter::new();
        counter.add_delay();
        counter.add_delay();
        assert!(!counter.remove_wait_and_check_ready());
        assert!(counter.remove_wait_and_check_ready());
        assert!(!counter.remove_wait_and_check_ready());
        assert!(!counter.remove_wait_and_check_ready());
        assert_eq!(counter.outstanding(), 0);
    }

    #[test]
    fn test_fan_in_counter() {
        let mut counter = DelayCounter::with_count(3);
        let ready: Vec<bool> = (0..3).map(|_| counter.remove_wait_and_check_ready()).collect();
        assert_eq!(ready, vec![false, false, true]);
    }

    #[test]
    fn test_parked_command_freed_after_all_latches_release() {
        let ids = actors(2);
        let mut latches = DelayCoordinator::new();
        latches.begin_delay(CommandId(1), &ids[..1]);
        latches.begin_delay(CommandId(2), &ids[1..]);

        let kind = CommandKind::ChangeShape;
        assert_eq!(latches.check_add_delay(CommandId(3), kind, false, &ids, ids[0]), ParkOutcome::Parked);
        assert_eq!(latches.check_add_delay(CommandId(3), kind, false, &ids, ids[1]), ParkOutcome::Parked);
        assert_eq!(latches.parked_count(), 1);

        latches.end_delay(CommandId(1), &ids[..1]);
        assert_eq!(latches.pop_freed(), None);
        latches.end_delay(CommandId(2), &ids[1..]);
        assert_eq!(latches.pop_freed(), Some(CommandId(3)));
        assert_eq!(latches.parked_count(), 0);
    }

    #[test]
    fn test_holder_is_clear_on_its_own_latch() {
        let ids = actors(1);
        let mut latches = DelayCoordinator::new();
        latches.begin_delay(CommandId(1), &ids);
        let outcome = latches.check_add_delay(CommandId(1), CommandKind::LinkChild, false, &ids, ids[0]);
        assert_eq!(outcome, ParkOutcome::Clear);
    }

    #[test]
    fn test_end_delay_ignores_latches_held_by_others() {
        let ids = actors(1);
        let mut latches = DelayCoordinator::new();
        latches.begin_delay(CommandId(1), &ids);
        latches.end_delay(CommandId(9), &ids);
        assert_eq!(latches.holder(ids[0]), Some(CommandId(1)));
        assert!(latches.begin_delay(CommandId(2), &ids).is_empty());
    }

    #[test]
    fn test_cullable_replaces_in_place() {
        let ids = actors(1);
        let mut latches = DelayCoordinator::new();
        latches.begin_delay(CommandId(1), &ids);
        let kind = CommandKind::SetPhysicality;
        latches.check_add_delay(CommandId(2), kind, true, &ids, ids[0]);
        latches.check_add_delay(CommandId(3), CommandKind::LinkChild, false, &ids, ids[0]);
        let outcome = latches.check_add_delay(CommandId(4), kind, true, &ids, ids[0]);
        assert_eq!(outcome, ParkOutcome::Replaced(CommandId(2)));
        latches.forget(CommandId(2));

        latches.end_delay(CommandId(1), &ids);
        let order: Vec<_> = std::iter::from_fn(|| latches.pop_freed()).collect();
        assert_eq!(order, vec![CommandId(4), CommandId(3)]);
    }

    #[test]
    fn test_cullable_with_different_targets_is_kept() {
        let ids = actors(2);
        let mut latches = DelayCoordinator::new();
        latches.begin_delay(CommandId(1), &ids[..1]);
        let kind = CommandKind::SetPhysicality;
        latches.check_add_delay(CommandId(2), kind, true, &ids[..1], ids[0]);
        let outcome = latches.check_add_delay(CommandId(3), kind, true, &ids, ids[0]);
        assert_eq!(outcome, ParkOutcome::Parked);
        assert_eq!(latches.parked_count(), 2);
    }

    #[test]
    fn test_release_holder_drops_all_its_latches() {
        let ids = actors(3);
        let mut latches = DelayCoordinator::new();
        latches.begin_delay(CommandId(1), &ids[..2]);
        latches.begin_delay(CommandId(2), &ids[2..]);
        latches.check_add_delay(CommandId(3), CommandKind::ChangeShape, false, &ids[..1], ids[0]);

        assert_eq!(latches.release_holder(CommandId(1)), 2);
        assert_eq!(latches.latch_count(), 1);
        assert_eq!(latches.pop_freed(), Some(CommandId(3)));
    }

    #[test]
    fn test_removed_actor_releases_parked() {
        let ids = actors(1);
        let mut latches = DelayCoordinator::new();
        latches.begin_delay(CommandId(1), &ids);
        latches.check_add_delay(CommandId(2), CommandKind::SetMaterial, false, &ids, ids[0]);
        latches.release_actor(ids[0]);
        assert!(!latches.is_latched(ids[0]));
        assert_eq!(latches.pop_freed(), Some(CommandId(2)));
    }
}
