//! Process metrics, exported in a Prometheus-compatible text format.
//!
//! The teacher registers counters with the external `metrics` crate's
//! recorder; this service has no metrics backend in its dependency stack,
//! so counters are plain `AtomicU64`s and `render()` formats them itself,
//! grounded on the teacher's static-name, atomic-counter style (`metrics/code.rs`).

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($($field:ident => $metric_name:literal),+ $(,)?) => {
        #[derive(Default)]
        pub struct Counters {
            $(pub $field: AtomicU64,)+
        }

        impl Counters {
            pub fn render(&self) -> String {
                let mut out = String::new();
                $(
                    out.push_str(&format!(
                        "# TYPE {name} counter\n{name} {value}\n",
                        name = $metric_name,
                        value = self.$field.load(Ordering::Relaxed),
                    ));
                )+
                out
            }
        }
    };
}

counters! {
    read_path_total => "oram_read_path_total",
    read_path_hits_total => "oram_read_path_hits_total",
    read_path_misses_total => "oram_read_path_misses_total",
    reshuffle_total => "oram_reshuffle_total",
    eviction_total => "oram_eviction_total",
    eviction_conflicts_total => "oram_eviction_conflicts_total",
    eviction_residual_blocks => "oram_eviction_residual_blocks",
    auth_errors_total => "oram_auth_errors_total",
    consensus_timeouts_total => "oram_consensus_timeouts_total",
    not_leader_total => "oram_not_leader_total",
    panics_total => "oram_panics_total",
}

impl Counters {
    pub fn inc_read_path_total(&self) {
        self.read_path_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_read_path_hits(&self) {
        self.read_path_hits_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_read_path_misses(&self) {
        self.read_path_misses_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reshuffle_total(&self) {
        self.reshuffle_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_eviction_total(&self) {
        self.eviction_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_eviction_conflicts(&self) {
        self.eviction_conflicts_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_eviction_residual_blocks(&self, n: u64) {
        self.eviction_residual_blocks.fetch_add(n, Ordering::Relaxed);
    }

    /// Records a failure by its `OramError::tag()`, bucketing the ones that
    /// have a dedicated counter and leaving the rest to structured logs.
    pub fn observe_error(&self, tag: &str) {
        match tag {
            "auth_error" => {
                self.auth_errors_total.fetch_add(1, Ordering::Relaxed);
            }
            "consensus_timeout" => {
                self.consensus_timeouts_total.fetch_add(1, Ordering::Relaxed);
            }
            "not_leader" => {
                self.not_leader_total.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub fn inc_panics(&self) {
        self.panics_total.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_counter() {
        let counters = Counters::default();
        counters.inc_read_path_total();
        counters.observe_error("auth_error");
        let rendered = counters.render();
        assert!(rendered.contains("oram_read_path_total 1"));
        assert!(rendered.contains("oram_auth_errors_total 1"));
    }
}
