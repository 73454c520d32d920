//
// Copyright (c) The Fabric Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::time::Duration;

use ipnetwork::IpNetwork;
use tokio::time::Instant;

// One kernel interface, as tracked from the netlink event stream.
#[derive(Debug)]
pub struct Interface {
    pub name: String,
    pub ifindex: u32,
    pub up: bool,
    pub addrs: BTreeSet<IpNetwork>,
    pub backoff: FlapBackoff,
}

// Exponential flap damping.
//
// Every link state transition (re)starts a hold-down window. Transitions
// arriving while the link is still unstable double the window, up to the
// configured maximum; a flap after sustained stability starts over from the
// initial value.
#[derive(Debug)]
pub struct FlapBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    until: Option<Instant>,
    last_flap: Option<Instant>,
}

// ===== impl Interface =====

impl Interface {
    pub fn new(
        name: String,
        ifindex: u32,
        up: bool,
        backoff_initial: Duration,
        backoff_max: Duration,
    ) -> Interface {
        Interface {
            name,
            ifindex,
            up,
            addrs: Default::default(),
            backoff: FlapBackoff::new(backoff_initial, backoff_max),
        }
    }

    // An interface is usable only when it is up and outside flap backoff.
    pub fn is_active(&self, now: Instant) -> bool {
        self.up && !self.backoff.is_backing_off(now)
    }
}

// ===== impl FlapBackoff =====

impl FlapBackoff {
    pub fn new(initial: Duration, max: Duration) -> FlapBackoff {
        FlapBackoff {
            initial,
            max,
            current: initial,
            until: None,
            last_flap: None,
        }
    }

    // Records a link state transition and returns the hold-down applied.
    pub fn flap(&mut self, now: Instant) -> Duration {
        match self.last_flap {
            // Still unstable: double the window.
            Some(last) if now.saturating_duration_since(last) < self.max => {
                self.current = std::cmp::min(self.current * 2, self.max);
            }
            // Stable long enough: start over.
            _ => self.current = self.initial,
        }
        self.last_flap = Some(now);
        self.until = Some(now + self.current);
        self.current
    }

    pub fn is_backing_off(&self, now: Instant) -> bool {
        self.until.is_some_and(|until| until > now)
    }

    // Instant at which the current hold-down ends, if one is running.
    pub fn expiry(&self, now: Instant) -> Option<Instant> {
        self.until.filter(|until| *until > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INITIAL: Duration = Duration::from_secs(1);
    const MAX: Duration = Duration::from_secs(8);

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_while_flapping() {
        let mut backoff = FlapBackoff::new(INITIAL, MAX);

        assert_eq!(backoff.flap(Instant::now()), INITIAL);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(backoff.flap(Instant::now()), INITIAL * 2);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(backoff.flap(Instant::now()), INITIAL * 4);
        assert!(backoff.is_backing_off(Instant::now()));

        // The cap holds.
        for _ in 0..10 {
            tokio::time::advance(Duration::from_millis(100)).await;
            backoff.flap(Instant::now());
        }
        assert_eq!(backoff.flap(Instant::now()), MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_resets_after_stability() {
        let mut backoff = FlapBackoff::new(INITIAL, MAX);
        backoff.flap(Instant::now());
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(backoff.flap(Instant::now()), INITIAL * 2);

        // Once the hold-down expires the interface is usable again.
        tokio::time::advance(INITIAL * 2).await;
        assert!(!backoff.is_backing_off(Instant::now()));

        // A flap long after the last one starts from the initial value.
        tokio::time::advance(MAX).await;
        assert_eq!(backoff.flap(Instant::now()), INITIAL);
    }
}
