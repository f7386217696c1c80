//! CPU load pool
//!
//! Each unit is a blocking task that repeats an AES-GCM encrypt/decrypt
//! round trip on fresh random input. Cancellation is checked at the top of
//! every iteration, so a stop request lands after at most one round trip.

use super::{ScaleOutcome, StepRule, UnitPool, CPU_DEADBAND};
use crate::models::Resource;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::{Rng, RngCore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CPU_STEPS: StepRule = StepRule {
    deadband: CPU_DEADBAND,
    up: cpu_units_to_add,
    down: cpu_units_to_remove,
};

/// At least one unit per scale-up, one more per 20 points of deviation
fn cpu_units_to_add(diff: f64) -> usize {
    ((diff / 20.0) as usize).max(1)
}

fn cpu_units_to_remove(excess: f64) -> usize {
    (excess / 20.0) as usize + 1
}

/// Default capacity: two units per logical processor
pub fn default_cpu_capacity() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

pub struct CpuPool {
    units: UnitPool,
}

impl Default for CpuPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuPool {
    pub fn new() -> Self {
        Self::with_capacity(default_cpu_capacity())
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            units: UnitPool::new(Resource::Cpu, capacity, CPU_STEPS),
        }
    }

    /// Move the unit count toward `target` CPU percent given `current`
    ///
    /// Must be called from within a Tokio runtime.
    pub fn scale_toward(&self, target: f64, current: f64) -> ScaleOutcome {
        self.units.scale_toward(target, current, |cancel| {
            tokio::task::spawn_blocking(move || burn_until_cancelled(cancel))
        })
    }

    pub fn count(&self) -> usize {
        self.units.count()
    }

    pub fn capacity(&self) -> usize {
        self.units.capacity()
    }

    pub(crate) async fn stop_all(&self, deadline: Instant) -> (usize, usize) {
        self.units.stop_all(deadline).await
    }
}

fn burn_until_cancelled(cancel: CancellationToken) {
    let mut rng = rand::thread_rng();
    while !cancel.is_cancelled() {
        std::hint::black_box(cipher_round_trip(&mut rng));
    }
}

/// One CPU-bound unit of work. Returns whether the plaintext survived.
pub(crate) fn cipher_round_trip<R: RngCore>(rng: &mut R) -> bool {
    let mut key = [0u8; 32];
    let mut nonce = [0u8; 12];
    let mut plaintext = [0u8; 32];
    rng.fill(&mut key);
    rng.fill(&mut nonce);
    rng.fill(&mut plaintext);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let nonce = Nonce::from_slice(&nonce);

    match cipher.encrypt(nonce, plaintext.as_ref()) {
        Ok(ciphertext) => cipher
            .decrypt(nonce, ciphertext.as_ref())
            .map(|decrypted| decrypted == plaintext)
            .unwrap_or(false),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_to_add_is_at_least_one() {
        assert_eq!(cpu_units_to_add(10.5), 1);
        assert_eq!(cpu_units_to_add(19.9), 1);
        assert_eq!(cpu_units_to_add(40.0), 2);
        assert_eq!(cpu_units_to_add(70.0), 3);
    }

    #[test]
    fn test_units_to_remove() {
        assert_eq!(cpu_units_to_remove(15.0), 1);
        assert_eq!(cpu_units_to_remove(20.0), 2);
        assert_eq!(cpu_units_to_remove(65.0), 4);
    }

    #[test]
    fn test_default_capacity_scales_with_processors() {
        let processors = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(default_cpu_capacity(), processors * 2);
        assert_eq!(CpuPool::new().capacity(), processors * 2);
    }

    #[test]
    fn test_cipher_round_trip_recovers_plaintext() {
        let mut rng = rand::thread_rng();
        for _ in 0..10 {
            assert!(cipher_round_trip(&mut rng));
        }
    }
}
