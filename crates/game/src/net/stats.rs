use rand::Rng;

/// Impairments applied to outgoing datagrams by the simulated sockets.
/// Latency only matters for the wall-clock [`super::LossySocket`]; the
/// in-memory [`super::SimulatedLink`] reorders instead.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    pub loss_percent: f32,
    pub duplicate_percent: f32,
    pub reorder_percent: f32,
    pub min_latency_ms: u32,
    pub max_latency_ms: u32,
    pub jitter_ms: u32,
}

impl PacketLossSimulation {
    pub fn lossy(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
            ..Default::default()
        }
    }

    pub fn should_drop<R: Rng>(&self, rng: &mut R) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rng.gen_range(0.0..100.0) < self.loss_percent
    }

    pub fn should_duplicate<R: Rng>(&self, rng: &mut R) -> bool {
        if !self.enabled || self.duplicate_percent <= 0.0 {
            return false;
        }
        rng.gen_range(0.0..100.0) < self.duplicate_percent
    }

    pub fn should_reorder<R: Rng>(&self, rng: &mut R) -> bool {
        if !self.enabled || self.reorder_percent <= 0.0 {
            return false;
        }
        rng.gen_range(0.0..100.0) < self.reorder_percent
    }

    pub fn delay_ms<R: Rng>(&self, rng: &mut R) -> u32 {
        if !self.enabled || self.max_latency_ms == 0 {
            return 0;
        }
        let base = self.min_latency_ms;
        let range = self.max_latency_ms.saturating_sub(self.min_latency_ms);
        let jitter = if self.jitter_ms > 0 {
            rng.gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        base + rng.gen_range(0..=range) + jitter
    }
}

#[derive(Debug, Clone, Default)]
pub struct NetworkStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub packets_retransmitted: u64,
    pub duplicates_dropped: u64,
    pub framing_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_ms: f32,
    pub rtt_variance: f32,
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn disabled_simulation_is_transparent() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let sim = PacketLossSimulation {
            enabled: false,
            loss_percent: 100.0,
            duplicate_percent: 100.0,
            reorder_percent: 100.0,
            min_latency_ms: 50,
            max_latency_ms: 80,
            jitter_ms: 5,
        };

        assert!(!sim.should_drop(&mut rng));
        assert!(!sim.should_duplicate(&mut rng));
        assert!(!sim.should_reorder(&mut rng));
        assert_eq!(sim.delay_ms(&mut rng), 0);
    }

    #[test]
    fn delay_stays_within_bounds() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let sim = PacketLossSimulation {
            enabled: true,
            min_latency_ms: 20,
            max_latency_ms: 40,
            jitter_ms: 10,
            ..Default::default()
        };

        for _ in 0..200 {
            let delay = sim.delay_ms(&mut rng);
            assert!((20..=50).contains(&delay));
        }
    }

    #[test]
    fn full_loss_drops_everything() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let sim = PacketLossSimulation::lossy(100.0);
        assert!((0..50).all(|_| sim.should_drop(&mut rng)));
    }
}
