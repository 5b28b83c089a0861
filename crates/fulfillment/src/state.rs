//! Checkout state machine.

/// The state of one checkout attempt.
///
/// State transitions:
/// ```text
/// Started ──► Validated ──► StockReserved(1..=n) ──► OrderPersisted ──► CartCleared ──► Committed
///    │            │                 │                      │                 │
///    └────────────┴─────────────────┴──────────────────────┴─────────────────┴──► Aborted
/// ```
///
/// `StockReserved(i)` counts the lines debited so far; each one also has its
/// order line written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CheckoutState {
    /// The transaction is open, nothing has been read yet.
    #[default]
    Started,

    /// The cart is non-empty and the payment method is recognised.
    Validated,

    /// The first `n` lines have been debited and recorded.
    StockReserved(usize),

    /// The order and all of its lines are written.
    OrderPersisted,

    /// The cart lines are deleted.
    CartCleared,

    /// The transaction committed (terminal state).
    Committed,

    /// The transaction rolled back (terminal state).
    Aborted,
}

impl CheckoutState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Committed | CheckoutState::Aborted)
    }

    /// Returns true if the attempt may move from this state to `next`.
    pub fn can_transition_to(&self, next: CheckoutState) -> bool {
        use CheckoutState::*;

        match (self, next) {
            (Committed | Aborted, _) => false,
            (_, Aborted) => true,
            (Started, Validated) => true,
            (Validated, StockReserved(1)) => true,
            (StockReserved(i), StockReserved(j)) => j == i + 1,
            (StockReserved(_), OrderPersisted) => true,
            (OrderPersisted, CartCleared) => true,
            (CartCleared, Committed) => true,
            _ => false,
        }
    }

    /// Returns the state name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Started => "Started",
            CheckoutState::Validated => "Validated",
            CheckoutState::StockReserved(_) => "StockReserved",
            CheckoutState::OrderPersisted => "OrderPersisted",
            CheckoutState::CartCleared => "CartCleared",
            CheckoutState::Committed => "Committed",
            CheckoutState::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckoutState::StockReserved(n) => write!(f, "StockReserved({n})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_started() {
        assert_eq!(CheckoutState::default(), CheckoutState::Started);
    }

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            CheckoutState::Started,
            CheckoutState::Validated,
            CheckoutState::StockReserved(1),
            CheckoutState::StockReserved(2),
            CheckoutState::OrderPersisted,
            CheckoutState::CartCleared,
            CheckoutState::Committed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_cannot_skip_steps() {
        assert!(!CheckoutState::Started.can_transition_to(CheckoutState::StockReserved(1)));
        assert!(!CheckoutState::Validated.can_transition_to(CheckoutState::OrderPersisted));
        assert!(!CheckoutState::StockReserved(1).can_transition_to(CheckoutState::StockReserved(3)));
        assert!(!CheckoutState::OrderPersisted.can_transition_to(CheckoutState::Committed));
    }

    #[test]
    fn test_any_live_state_can_abort() {
        for state in [
            CheckoutState::Started,
            CheckoutState::Validated,
            CheckoutState::StockReserved(4),
            CheckoutState::OrderPersisted,
            CheckoutState::CartCleared,
        ] {
            assert!(state.can_transition_to(CheckoutState::Aborted));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(CheckoutState::Committed.is_terminal());
        assert!(CheckoutState::Aborted.is_terminal());
        assert!(!CheckoutState::CartCleared.is_terminal());
        assert!(!CheckoutState::Committed.can_transition_to(CheckoutState::Aborted));
        assert!(!CheckoutState::Aborted.can_transition_to(CheckoutState::Started));
    }

    #[test]
    fn test_display() {
        assert_eq!(CheckoutState::Validated.to_string(), "Validated");
        assert_eq!(CheckoutState::StockReserved(2).to_string(), "StockReserved(2)");
    }
}
