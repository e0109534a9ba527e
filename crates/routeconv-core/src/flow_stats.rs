use routeconv_abstract::{FiveTuple, FlowCounters, FlowId, SimulationContext, VirtualTime};
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::warn;

/// Metrics derived from one set of counters. Time values are in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FlowMetrics {
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub lost_packets: u64,
    pub loss_ratio: f64,
    pub avg_packet_size: f64,
    pub throughput_mbps: f64,
    pub avg_delay: f64,
    pub avg_jitter: f64,
}

/// Which flows a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FlowFilter {
    All,
    Pair {
        source: Ipv4Addr,
        destination: Ipv4Addr,
    },
}

impl FlowFilter {
    pub fn matches(&self, tuple: &FiveTuple) -> bool {
        match self {
            FlowFilter::All => true,
            FlowFilter::Pair {
                source,
                destination,
            } => tuple.source_address == *source && tuple.destination_address == *destination,
        }
    }
}

impl fmt::Display for FlowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowFilter::All => f.write_str("all flows"),
            FlowFilter::Pair {
                source,
                destination,
            } => write!(f, "{source} -> {destination}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowRecord {
    pub flow_id: FlowId,
    pub five_tuple: FiveTuple,
    pub counters: FlowCounters,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowReportEntry {
    pub flow_id: FlowId,
    pub five_tuple: FiveTuple,
    pub metrics: FlowMetrics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub flow_count: usize,
    pub metrics: FlowMetrics,
}

/// Flow statistics read at one instant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub time_ms: VirtualTime,
    pub filter: FlowFilter,
    pub flows: Vec<FlowReportEntry>,
    pub aggregate: AggregateStats,
}

/// Turns the engine's cumulative flow counters into report metrics.
///
/// Throughput is always relative to the full simulation duration, not to the
/// time elapsed when the report is taken.
#[derive(Debug, Clone, Copy)]
pub struct FlowStatsAggregator {
    simulation_duration: Duration,
}

impl FlowStatsAggregator {
    pub fn new(simulation_duration: Duration) -> Self {
        Self {
            simulation_duration,
        }
    }

    pub fn simulation_duration(&self) -> Duration {
        self.simulation_duration
    }

    pub fn metrics(&self, counters: &FlowCounters) -> FlowMetrics {
        let tx = counters.tx_packets;
        let rx = counters.rx_packets;
        let duration = self.simulation_duration.as_secs_f64();

        FlowMetrics {
            tx_packets: tx,
            rx_packets: rx,
            lost_packets: counters.lost_packets,
            loss_ratio: ratio(counters.lost_packets as f64, tx),
            avg_packet_size: ratio(counters.tx_bytes as f64, tx),
            throughput_mbps: if duration > 0.0 {
                counters.rx_bytes as f64 * 8.0 / duration / 1_000_000.0
            } else {
                0.0
            },
            avg_delay: ratio(counters.delay_sum.as_secs_f64(), rx),
            avg_jitter: if rx > 1 {
                counters.jitter_sum.as_secs_f64() / (rx - 1) as f64
            } else {
                0.0
            },
        }
    }

    /// Read every classified flow matching `filter`, in flow id order.
    ///
    /// Overdue packets are accounted as lost first.
    pub fn collect(&self, ctx: &mut dyn SimulationContext, filter: FlowFilter) -> Vec<FlowRecord> {
        ctx.check_for_lost_packets();

        let mut stats = ctx.flow_stats();
        stats.sort_by_key(|(id, _)| *id);
        stats
            .into_iter()
            .filter_map(|(flow_id, counters)| {
                let Some(five_tuple) = ctx.classify_flow(flow_id) else {
                    warn!(flow_id, "flow has no classification, skipping");
                    return None;
                };
                Some(FlowRecord {
                    flow_id,
                    five_tuple,
                    counters,
                })
            })
            .filter(|record| filter.matches(&record.five_tuple))
            .collect()
    }

    /// Sum counters over `records`. Jitter is only taken from flows that
    /// received more than one packet, since the others carry none.
    pub fn aggregate_counters(records: &[FlowRecord]) -> FlowCounters {
        records
            .iter()
            .fold(FlowCounters::default(), |mut total, record| {
                let c = &record.counters;
                total.tx_packets += c.tx_packets;
                total.rx_packets += c.rx_packets;
                total.lost_packets += c.lost_packets;
                total.tx_bytes += c.tx_bytes;
                total.rx_bytes += c.rx_bytes;
                total.delay_sum += c.delay_sum;
                if c.rx_packets > 1 {
                    total.jitter_sum += c.jitter_sum;
                }
                total
            })
    }

    pub fn aggregate(&self, records: &[FlowRecord]) -> AggregateStats {
        AggregateStats {
            flow_count: records.len(),
            metrics: self.metrics(&Self::aggregate_counters(records)),
        }
    }

    /// Per-flow and aggregate metrics for the flows matching `filter`.
    pub fn report(&self, ctx: &mut dyn SimulationContext, filter: FlowFilter) -> StatsReport {
        let records = self.collect(ctx, filter);
        let flows = records
            .iter()
            .map(|record| FlowReportEntry {
                flow_id: record.flow_id,
                five_tuple: record.five_tuple,
                metrics: self.metrics(&record.counters),
            })
            .collect();

        StatsReport {
            time_ms: ctx.now(),
            filter,
            flows,
            aggregate: self.aggregate(&records),
        }
    }
}

fn ratio(numerator: f64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator / denominator as f64
    }
}

fn write_metrics(f: &mut fmt::Formatter<'_>, m: &FlowMetrics) -> fmt::Result {
    writeln!(f, "  Tx Packets: {}", m.tx_packets)?;
    writeln!(f, "  Rx Packets: {}", m.rx_packets)?;
    writeln!(f, "  Lost Packets: {}", m.lost_packets)?;
    writeln!(f, "  Packet Loss Ratio: {:.6}", m.loss_ratio)?;
    writeln!(f, "  Average Packet Size: {:.2} bytes", m.avg_packet_size)?;
    writeln!(f, "  Throughput: {:.6} Mbps", m.throughput_mbps)?;
    writeln!(f, "  Delay: {:.6} s", m.avg_delay)?;
    writeln!(f, "  Jitter: {:.6} s", m.avg_jitter)
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "=== Flow statistics at {:.1} s ({}) ===",
            self.time_ms as f64 / 1000.0,
            self.filter
        )?;
        for flow in &self.flows {
            writeln!(f, "Flow {} ({})", flow.flow_id, flow.five_tuple)?;
            write_metrics(f, &flow.metrics)?;
        }
        writeln!(f, "Aggregate over {} flow(s)", self.aggregate.flow_count)?;
        write_metrics(f, &self.aggregate.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedEngine;

    fn sample_counters() -> FlowCounters {
        FlowCounters {
            tx_packets: 1000,
            rx_packets: 950,
            lost_packets: 50,
            tx_bytes: 1_024_000,
            rx_bytes: 972_800,
            delay_sum: Duration::from_secs(19),
            jitter_sum: Duration::from_millis(949),
        }
    }

    fn aggregator() -> FlowStatsAggregator {
        FlowStatsAggregator::new(Duration::from_secs(300))
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn tuple(src: [u8; 4], dst: [u8; 4]) -> FiveTuple {
        FiveTuple::udp((Ipv4Addr::from(src), 49153), (Ipv4Addr::from(dst), 9))
    }

    #[test]
    fn metrics_for_partial_loss() {
        let m = aggregator().metrics(&sample_counters());
        assert!(close(m.loss_ratio, 0.05));
        assert!(close(m.avg_packet_size, 1024.0));
        assert!(close(m.throughput_mbps, 972_800.0 * 8.0 / 300.0 / 1e6));
        assert!((m.throughput_mbps - 0.0259413).abs() < 1e-6);
        assert!(close(m.avg_delay, 0.02));
        assert!(close(m.avg_jitter, 0.001));
    }

    #[test]
    fn degenerate_counters_are_zero() {
        let m = aggregator().metrics(&FlowCounters::default());
        assert_eq!(m, FlowMetrics::default());

        let zero_duration = FlowStatsAggregator::new(Duration::ZERO);
        assert_eq!(zero_duration.metrics(&sample_counters()).throughput_mbps, 0.0);
    }

    #[test]
    fn jitter_needs_two_packets() {
        let counters = FlowCounters {
            tx_packets: 3,
            rx_packets: 1,
            lost_packets: 2,
            jitter_sum: Duration::from_millis(5),
            ..FlowCounters::default()
        };
        let m = aggregator().metrics(&counters);
        assert_eq!(m.avg_jitter, 0.0);
        assert!(m.loss_ratio >= 0.0 && m.loss_ratio <= 1.0);
    }

    #[test]
    fn aggregate_skips_single_packet_jitter() {
        let records = [
            FlowRecord {
                flow_id: 1,
                five_tuple: tuple([10, 0, 0, 1], [10, 0, 3, 2]),
                counters: sample_counters(),
            },
            FlowRecord {
                flow_id: 2,
                five_tuple: tuple([10, 0, 3, 2], [10, 0, 0, 1]),
                counters: FlowCounters {
                    tx_packets: 10,
                    rx_packets: 1,
                    lost_packets: 9,
                    tx_bytes: 100,
                    rx_bytes: 10,
                    delay_sum: Duration::from_millis(10),
                    jitter_sum: Duration::from_secs(1),
                },
            },
        ];

        let total = FlowStatsAggregator::aggregate_counters(&records);
        assert_eq!(total.tx_packets, 1010);
        assert_eq!(total.rx_packets, 951);
        assert_eq!(total.jitter_sum, Duration::from_millis(949));

        let stats = aggregator().aggregate(&records);
        assert_eq!(stats.flow_count, 2);
        assert!(close(stats.metrics.loss_ratio, 59.0 / 1010.0));
        assert!(close(stats.metrics.avg_jitter, 0.949 / 950.0));
    }

    #[test]
    fn report_filters_by_pair() {
        let mut engine = ScriptedEngine::new();
        engine.add_flow(2, tuple([10, 0, 3, 2], [10, 0, 0, 1]), FlowCounters::default());
        engine.add_flow(1, tuple([10, 0, 0, 1], [10, 0, 3, 2]), sample_counters());
        engine.run_until(100_000).unwrap();

        let filter = FlowFilter::Pair {
            source: Ipv4Addr::new(10, 0, 0, 1),
            destination: Ipv4Addr::new(10, 0, 3, 2),
        };
        let report = aggregator().report(&mut engine, filter);

        assert_eq!(engine.lost_checks, 1);
        assert_eq!(report.time_ms, 100_000);
        assert_eq!(report.flows.len(), 1);
        assert_eq!(report.flows[0].flow_id, 1);
        assert_eq!(report.aggregate.flow_count, 1);
        assert!(close(report.aggregate.metrics.loss_ratio, 0.05));

        let all = aggregator().report(&mut engine, FlowFilter::All);
        let ids: Vec<_> = all.flows.iter().map(|f| f.flow_id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn report_renders_operator_block() {
        let mut engine = ScriptedEngine::new();
        engine.add_flow(1, tuple([10, 0, 0, 1], [10, 0, 3, 2]), sample_counters());
        let text = aggregator().report(&mut engine, FlowFilter::All).to_string();
        assert!(text.contains("Flow 1 (10.0.0.1 -> 10.0.3.2)"));
        assert!(text.contains("Packet Loss Ratio: 0.050000"));
        assert!(text.contains("Aggregate over 1 flow(s)"));
    }
}
