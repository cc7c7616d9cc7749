/// Counters kept by the reliable transport, mutated only inside
/// `submit` / `on_ack` / `on_data` / `tick`.
#[derive(Debug, Default, Clone)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub packets_retransmitted: u64,
    pub packets_acked: u64,
    pub packets_received: u64,
    /// DATA received for a slot that was already filled.
    pub duplicates: u64,
    /// DATA discarded because its sequence fell outside the window.
    pub out_of_window: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}
