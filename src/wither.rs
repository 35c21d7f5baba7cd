//! Generational cache aging (spec §4.4, component C5).
//!
//! The tree does not time out entries by wall-clock; it counts
//! traversals. Every completed traversal (unless suppressed by
//! [`crate::props::TraverseProps::do_not_wither`]) advances a single
//! monotone counter, and any leaf-level node whose `birth_gen` has fallen
//! more than `life_span` generations behind gets its fetched data released
//! back to a filler state. This keeps memory bounded for long-lived
//! genome-browser sessions without requiring an external cache evictor.
use tracing::debug;

/// Tracks the tree's current generation and the wither policy applied to
/// nodes that fall behind it.
#[derive(Debug, Clone, Copy)]
pub struct WitherClock {
    current_gen: u64,
    life_span: u64,
}

impl WitherClock {
    /// `life_span == 0` disables withering entirely: nodes are created at
    /// generation 0 and never re-checked.
    pub fn new(life_span: u64) -> Self {
        Self {
            current_gen: 0,
            life_span,
        }
    }

    pub fn current_gen(&self) -> u64 {
        self.current_gen
    }

    pub fn life_span(&self) -> u64 {
        self.life_span
    }

    pub fn is_enabled(&self) -> bool {
        self.life_span > 0
    }

    /// Advances the generation counter by one, as a completed traversal
    /// does. Saturates rather than wraps at `u64::MAX`; in practice a tree
    /// would be long retired before this matters.
    pub fn advance(&mut self) -> u64 {
        self.current_gen = self.current_gen.saturating_add(1);
        debug!(generation = self.current_gen, "advanced wither generation");
        self.current_gen
    }
}

impl Default for WitherClock {
    /// Matches the tree's own default config: withering disabled.
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn advance_increments_generation() {
        let mut clock = WitherClock::new(10);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.advance(), 2);
        assert_eq!(clock.current_gen(), 2);
    }

    #[test]
    fn zero_life_span_is_disabled() {
        let clock = WitherClock::new(0);
        assert!(!clock.is_enabled());
    }
}
