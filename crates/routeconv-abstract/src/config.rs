use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timeline and traffic parameters of a run. All times are virtual milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    pub simulation_time: u64,
    pub link_down_time: u64,
    pub link_up_time: u64,
    pub udp_start_time: u64,
    pub udp_interval: u64,
    pub udp_packet_size: u32,
    pub udp_max_packets: u64,
    /// Delay between a window start and its first routing table sample.
    pub first_sample_delay: u64,
    /// Period of routing table samples after the first one.
    pub sample_period: u64,
    pub loss_rate: f64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            simulation_time: 300_000,
            link_down_time: 100_000,
            link_up_time: 200_000,
            udp_start_time: 50_000,
            udp_interval: 100,
            udp_packet_size: 1024,
            udp_max_packets: 10_000,
            first_sample_delay: 1_000,
            sample_period: 100,
            loss_rate: 0.0,
            seed: 0,
        }
    }
}

impl SimConfig {
    pub fn simulation_duration(&self) -> Duration {
        Duration::from_millis(self.simulation_time)
    }
}
