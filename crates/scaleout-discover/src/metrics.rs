//! Prometheus exporter for scale-out interface counters.
//!
//! Each exported counter is the sum of one or more raw driver statistics.
//! Values are read from the statistics source on every scrape; there is no
//! background polling.

use parking_lot::Mutex;
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{IntCounter, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::error::Result;
use crate::link::LinkRegistry;
use crate::stats::StatsSource;

/// Prefix of every exported series.
pub const METRICS_PREFIX: &str = "gaudi_scaleout_";

/// One exported counter and the raw statistics it sums.
#[derive(Debug)]
pub struct EthStatistic {
    pub name: &'static str,
    pub help: &'static str,
    pub sum_of: &'static [&'static str],
}

/// Exported counters.
pub const NETWORK_STATISTICS: &[EthStatistic] = &[
    EthStatistic {
        name: "rx_packets",
        help: "Packets received by scale-out network",
        sum_of: &["ifInUcastPkts", "ifInMulticastPkts", "ifInBroadcastPkts"],
    },
    EthStatistic {
        name: "tx_packets",
        help: "Packets transmitted by scale-out network",
        sum_of: &["ifOutUcastPkts", "ifOutMulticastPkts", "ifOutBroadcastPkts"],
    },
    EthStatistic {
        name: "rx_bytes",
        help: "Bytes received by scale-out network",
        sum_of: &["OctetsReceivedOK"],
    },
    EthStatistic {
        name: "tx_bytes",
        help: "Bytes transmitted by scale-out network",
        sum_of: &["OctetsTransmittedOK"],
    },
    EthStatistic {
        name: "rx_errors",
        help: "Errors in scale-out network reception",
        sum_of: &["ifInErrors"],
    },
    EthStatistic {
        name: "tx_errors",
        help: "Errors in scale-out network transmission",
        sum_of: &["ifOutErrors"],
    },
];

struct InterfaceMetrics {
    ifname: String,
    labels: HashMap<String, String>,
    descs: Vec<Desc>,
}

/// Collector exporting [`NETWORK_STATISTICS`] for every managed link.
pub struct NetworkExporter {
    interfaces: Vec<InterfaceMetrics>,
    source: Arc<dyn StatsSource>,
    scrape_lock: Mutex<()>,
}

impl NetworkExporter {
    /// Builds descriptors for every link in `links`.
    pub fn new(links: &LinkRegistry, source: Arc<dyn StatsSource>) -> Result<Self> {
        let mut interfaces = Vec::with_capacity(links.len());

        for link in links.iter() {
            let macaddr = link
                .local_hw_addr()
                .map(|mac| mac.to_string())
                .unwrap_or_default();
            let labels = HashMap::from([
                ("macaddr".to_string(), macaddr),
                ("ifname".to_string(), link.name().to_string()),
            ]);

            let descs = NETWORK_STATISTICS
                .iter()
                .map(|stat| {
                    Desc::new(
                        format!("{METRICS_PREFIX}{}", stat.name),
                        stat.help.to_string(),
                        Vec::new(),
                        labels.clone(),
                    )
                })
                .collect::<std::result::Result<Vec<_>, _>>()?;

            interfaces.push(InterfaceMetrics {
                ifname: link.name().to_string(),
                labels,
                descs,
            });
        }

        Ok(Self {
            interfaces,
            source,
            scrape_lock: Mutex::new(()),
        })
    }

    /// Creates a registry with this exporter registered.
    pub fn into_registry(self) -> Result<Registry> {
        let registry = Registry::new();
        registry.register(Box::new(self))?;
        Ok(registry)
    }

    fn interface_families(&self, interface: &InterfaceMetrics) -> Vec<MetricFamily> {
        // Counters are zero for this scrape if the source fails.
        let raw = self.source.stats(&interface.ifname).unwrap_or_else(|e| {
            warn!(ifname = %interface.ifname, error = %e, "Ethtool statistics failed");
            HashMap::new()
        });

        let mut families = Vec::with_capacity(NETWORK_STATISTICS.len());
        for stat in NETWORK_STATISTICS {
            let sum = stat
                .sum_of
                .iter()
                .filter_map(|field| raw.get(*field))
                .fold(0u64, |acc, v| acc.wrapping_add(*v));

            let opts = Opts::new(format!("{METRICS_PREFIX}{}", stat.name), stat.help)
                .const_labels(interface.labels.clone());
            match IntCounter::with_opts(opts) {
                Ok(counter) => {
                    counter.inc_by(sum);
                    families.extend(counter.collect());
                }
                Err(e) => warn!(ifname = %interface.ifname, metric = stat.name, error = %e, "Cannot build counter"),
            }
        }
        families
    }
}

impl Collector for NetworkExporter {
    fn desc(&self) -> Vec<&Desc> {
        self.interfaces
            .iter()
            .flat_map(|interface| interface.descs.iter())
            .collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let _guard = self.scrape_lock.lock();
        self.interfaces
            .iter()
            .flat_map(|interface| self.interface_families(interface))
            .collect()
    }
}
