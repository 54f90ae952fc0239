use crate::{Collector, Readings};
use anyhow::Result;
use sysinfo::Networks;

/// Cumulative per-interface counters as reported by the OS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub errin: u64,
    pub errout: u64,
}

impl InterfaceCounters {
    /// Appends `net.if.{name}.*` readings for this interface.
    pub fn write_readings(&self, name: &str, readings: &mut Readings) {
        for (field, value) in [
            ("bytes_sent", self.bytes_sent),
            ("bytes_recv", self.bytes_recv),
            ("packets_sent", self.packets_sent),
            ("packets_recv", self.packets_recv),
            ("errin", self.errin),
            ("errout", self.errout),
        ] {
            readings.insert(format!("net.if.{name}.{field}"), value as f64);
        }
    }
}

/// Reports cumulative traffic counters for every network interface.
pub struct NetworkCollector {
    networks: Networks,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self {
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for NetworkCollector {
    fn name(&self) -> &str {
        "network"
    }

    fn collect(&mut self) -> Result<Readings> {
        self.networks.refresh();
        let mut readings = Readings::new();
        for (name, data) in self.networks.iter() {
            InterfaceCounters {
                bytes_sent: data.total_transmitted(),
                bytes_recv: data.total_received(),
                packets_sent: data.total_packets_transmitted(),
                packets_recv: data.total_packets_received(),
                errin: data.total_errors_on_received(),
                errout: data.total_errors_on_transmitted(),
            }
            .write_readings(name, &mut readings);
        }
        Ok(readings)
    }
}
