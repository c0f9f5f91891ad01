use std::time::Duration;

use anyhow::ensure;
use hexarena_session::Rules;

/// Settings for one core node. Mutations have no effect after the node is
/// started.
#[derive(Clone, Debug)]
pub struct CoreSettings {
    /// Length of one round. Deadlines are stored with second precision, so
    /// this must be at least one second.
    ///
    /// # Default Value
    ///
    /// `30` seconds.
    pub round_duration: Duration,
    /// Per-call budget for session commands. A call that exceeds it returns
    /// a timeout to the caller but may still be applied.
    ///
    /// # Default Value
    ///
    /// `5` seconds.
    pub command_timeout: Duration,
    /// How long a shutting-down node waits for its handoff stash to reach a
    /// live peer before giving up with a warning.
    ///
    /// # Default Value
    ///
    /// `2` seconds.
    pub handoff_stash_grace: Duration,
    /// Backoff between handoff pickup attempts while a runtime boots.
    ///
    /// # Default Value
    ///
    /// `25` milliseconds.
    pub handoff_pickup_retry: Duration,
    /// Total handoff pickup window before a booting runtime falls back to
    /// the durable store.
    ///
    /// # Default Value
    ///
    /// `250` milliseconds.
    pub handoff_pickup_total: Duration,
    /// Database URL of the durable summary store.
    ///
    /// # Default Value
    ///
    /// `sqlite:hexarena.db`
    pub dss_url: String,
    /// Connection pool size for the durable store. Size this against total
    /// cluster fan-in: `nodes * dss_pool_size` must stay at or below the
    /// database server's connection ceiling.
    ///
    /// # Default Value
    ///
    /// `5`
    pub dss_pool_size: u32,
    /// Opaque discovery identifier handed to the external cluster mechanism.
    ///
    /// # Default Value
    ///
    /// `hexarena`
    pub cluster_query: String,
    /// Radius of the hexagonal board built for new sessions.
    ///
    /// # Default Value
    ///
    /// `3` (a 37-cell board).
    pub grid_radius: i64,
    /// The action-point economy and combat numbers.
    pub rules: Rules,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            round_duration: Duration::from_secs(30),
            command_timeout: Duration::from_secs(5),
            handoff_stash_grace: Duration::from_secs(2),
            handoff_pickup_retry: Duration::from_millis(25),
            handoff_pickup_total: Duration::from_millis(250),
            dss_url: "sqlite:hexarena.db".to_owned(),
            dss_pool_size: 5,
            cluster_query: "hexarena".to_owned(),
            grid_radius: 3,
            rules: Rules::default(),
        }
    }
}

impl CoreSettings {
    pub(crate) fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.round_duration >= Duration::from_secs(1),
            "round duration must be at least one second"
        );
        ensure!(
            !self.command_timeout.is_zero(),
            "command timeout must be nonzero"
        );
        ensure!(self.dss_pool_size > 0, "durable store pool must be nonzero");
        ensure!(self.grid_radius >= 0, "grid radius must not be negative");
        ensure!(
            self.rules.starting_ap >= 0 && self.rules.ap_cap >= 0,
            "action point configuration must not be negative"
        );

        Ok(())
    }
}
