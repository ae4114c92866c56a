//! Fallback identification procedures and their arbitration.
//!
//! Services that know how to identify instruments the standard dialects
//! cannot handle register a procedure with the manager. When the
//! [`Negotiator`](crate::ident::Negotiator) comes up empty, the arbiter calls
//! each registered procedure in turn, oldest registration first, and the
//! first non-error, non-empty answer wins. A procedure that errors is logged
//! and treated as a non-match; arbitration continues with the next one.
//!
//! Procedures are owned by a session and removed with it. Each owning
//! service carries at most one procedure; re-registering replaces the
//! previous one in place, keeping its position in the trial order.

use crate::bus::IdentProcedure;
use crate::messages::{ServiceId, SessionId};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// One registered fallback identification capability.
pub struct ProcedureEntry {
    /// Procedure name, for diagnostics
    pub name: String,
    /// Owning service
    pub owner: ServiceId,
    /// Owning session
    pub session: SessionId,
    handler: Arc<dyn IdentProcedure>,
}

/// Ordered table of fallback procedures plus the trial chain over them.
#[derive(Default)]
pub struct IdentArbiter {
    procedures: Vec<ProcedureEntry>,
}

impl IdentArbiter {
    /// Create an empty arbiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a procedure, replacing any previous registration by the same
    /// owner in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        owner: ServiceId,
        session: SessionId,
        handler: Arc<dyn IdentProcedure>,
    ) {
        let entry = ProcedureEntry {
            name: name.into(),
            owner,
            session,
            handler,
        };
        if let Some(existing) = self.procedures.iter_mut().find(|p| p.owner == owner) {
            debug!(owner, old = %existing.name, new = %entry.name, "replacing ident procedure");
            *existing = entry;
        } else {
            debug!(owner, name = %entry.name, "registered ident procedure");
            self.procedures.push(entry);
        }
    }

    /// Remove every procedure owned by `session`. Returns how many were
    /// removed.
    pub fn remove_session(&mut self, session: SessionId) -> usize {
        let before = self.procedures.len();
        self.procedures.retain(|p| p.session != session);
        before - self.procedures.len()
    }

    /// Whether `owner` currently has a procedure registered.
    pub fn owned_by(&self, owner: ServiceId) -> bool {
        self.procedures.iter().any(|p| p.owner == owner)
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.procedures.len()
    }

    /// Whether no procedures are registered.
    pub fn is_empty(&self) -> bool {
        self.procedures.is_empty()
    }

    /// Try every registered procedure in order until one identifies the
    /// device. Callers hold the manager task, so trials never interleave.
    pub async fn identify(&self, bus: &str, channel: &str, raw: Option<&str>) -> Option<String> {
        for entry in &self.procedures {
            if let Some(name) = try_procedure(entry, bus, channel, raw).await {
                return Some(name);
            }
        }
        None
    }

    /// Try only the procedures owned by `owner`, in order. Used by backfill
    /// passes, where procedures that already had their chance are skipped.
    pub async fn identify_owned_by(
        &self,
        owner: ServiceId,
        bus: &str,
        channel: &str,
        raw: Option<&str>,
    ) -> Option<String> {
        for entry in self.procedures.iter().filter(|p| p.owner == owner) {
            if let Some(name) = try_procedure(entry, bus, channel, raw).await {
                return Some(name);
            }
        }
        None
    }

    /// Render the procedure table for diagnostics.
    pub fn dump(&self) -> String {
        if self.procedures.is_empty() {
            return "no ident procedures registered\n".to_string();
        }
        let mut out = String::new();
        for entry in &self.procedures {
            let _ = writeln!(
                out,
                "{} (owner {}, session {})",
                entry.name, entry.owner, entry.session
            );
        }
        out
    }
}

async fn try_procedure(
    entry: &ProcedureEntry,
    bus: &str,
    channel: &str,
    raw: Option<&str>,
) -> Option<String> {
    debug!(procedure = %entry.name, bus, channel, "trying ident procedure");
    match entry.handler.identify(bus, channel, raw).await {
        Ok(Some(name)) => {
            debug!(procedure = %entry.name, bus, channel, device = %name, "procedure identified device");
            Some(name)
        }
        Ok(None) => None,
        Err(err) => {
            warn!(procedure = %entry.name, bus, channel, error = %err, "ident procedure failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProcedure;
    use std::sync::Mutex;

    fn call_log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn first_matching_procedure_wins_in_registration_order() {
        let log = call_log();
        let mut arbiter = IdentArbiter::new();
        arbiter.register("p1", 1, 10, ScriptedProcedure::answering("p1", None, &log));
        arbiter.register("p2", 2, 20, ScriptedProcedure::answering("p2", Some("X"), &log));
        arbiter.register("p3", 3, 30, ScriptedProcedure::answering("p3", Some("Y"), &log));

        let name = arbiter.identify("gpib0", "4", Some("")).await;
        assert_eq!(name.as_deref(), Some("X"));
        // p1 was tried first and p3 never reached.
        assert_eq!(*log.lock().unwrap(), vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn erroring_procedure_is_a_non_match() {
        let log = call_log();
        let mut arbiter = IdentArbiter::new();
        arbiter.register("bad", 1, 10, ScriptedProcedure::failing("bad", &log));
        arbiter.register("good", 2, 20, ScriptedProcedure::answering("good", Some("Z"), &log));

        let name = arbiter.identify("gpib0", "4", None).await;
        assert_eq!(name.as_deref(), Some("Z"));
        assert_eq!(*log.lock().unwrap(), vec!["bad", "good"]);
    }

    #[tokio::test]
    async fn reregistration_replaces_in_place() {
        let log = call_log();
        let mut arbiter = IdentArbiter::new();
        arbiter.register("old", 1, 10, ScriptedProcedure::answering("old", None, &log));
        arbiter.register("late", 2, 20, ScriptedProcedure::answering("late", Some("L"), &log));
        // Same owner registers a better procedure: position is kept.
        arbiter.register("new", 1, 10, ScriptedProcedure::answering("new", Some("N"), &log));

        assert_eq!(arbiter.len(), 2);
        let name = arbiter.identify("gpib0", "4", None).await;
        assert_eq!(name.as_deref(), Some("N"));
        assert_eq!(*log.lock().unwrap(), vec!["new"]);
    }

    #[tokio::test]
    async fn identify_owned_by_skips_other_owners() {
        let log = call_log();
        let mut arbiter = IdentArbiter::new();
        arbiter.register("p1", 1, 10, ScriptedProcedure::answering("p1", Some("A"), &log));
        arbiter.register("p2", 2, 20, ScriptedProcedure::answering("p2", Some("B"), &log));

        let name = arbiter.identify_owned_by(2, "gpib0", "4", None).await;
        assert_eq!(name.as_deref(), Some("B"));
        assert_eq!(*log.lock().unwrap(), vec!["p2"]);
    }

    #[tokio::test]
    async fn remove_session_drops_all_of_a_sessions_procedures() {
        let log = call_log();
        let mut arbiter = IdentArbiter::new();
        arbiter.register("p1", 1, 10, ScriptedProcedure::answering("p1", Some("A"), &log));
        arbiter.register("p2", 2, 10, ScriptedProcedure::answering("p2", Some("B"), &log));
        arbiter.register("p3", 3, 30, ScriptedProcedure::answering("p3", Some("C"), &log));

        assert_eq!(arbiter.remove_session(10), 2);
        assert_eq!(arbiter.len(), 1);
        assert!(!arbiter.owned_by(1));
        assert!(arbiter.owned_by(3));
    }

    #[test]
    fn dump_lists_procedures_or_placeholder() {
        let mut arbiter = IdentArbiter::new();
        assert!(arbiter.dump().contains("no ident procedures"));
        arbiter.register(
            "identify_scope",
            7,
            70,
            ScriptedProcedure::answering("identify_scope", None, &call_log()),
        );
        assert!(arbiter.dump().contains("identify_scope (owner 7, session 70)"));
    }
}
