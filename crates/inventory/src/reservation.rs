use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockhold_core::{DomainError, DomainResult, Entity, OrderId, ReservationId, Sku, UserId, ValueObject};

/// A requested line of an order, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: Sku,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(sku: Sku, quantity: i64) -> Self {
        Self { sku, quantity }
    }
}

/// A reserved line: quantity is always positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationLine {
    sku: Sku,
    quantity: i64,
}

impl ReservationLine {
    pub fn new(sku: Sku, quantity: i64) -> DomainResult<Self> {
        if sku.is_blank() {
            return Err(DomainError::validation("reservation line sku cannot be empty"));
        }
        if quantity <= 0 {
            return Err(DomainError::validation(format!(
                "reservation line quantity for {sku} must be positive"
            )));
        }
        Ok(Self { sku, quantity })
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }
}

impl ValueObject for ReservationLine {}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Active,
    Released,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "ACTIVE",
            ReservationStatus::Released => "RELEASED",
        }
    }

    pub fn parse(raw: &str) -> DomainResult<Self> {
        match raw {
            "ACTIVE" => Ok(ReservationStatus::Active),
            "RELEASED" => Ok(ReservationStatus::Released),
            other => Err(DomainError::validation(format!(
                "unknown reservation status: {other}"
            ))),
        }
    }
}

impl core::fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stock held for one order.
///
/// At most one reservation exists per order. ACTIVE → RELEASED happens once;
/// RELEASED is terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReservation {
    id: ReservationId,
    order_id: OrderId,
    user_id: UserId,
    status: ReservationStatus,
    reserved_at: DateTime<Utc>,
    released_at: Option<DateTime<Utc>>,
    lines: Vec<ReservationLine>,
}

impl StockReservation {
    /// Open an ACTIVE reservation.
    pub fn open(
        order_id: OrderId,
        user_id: UserId,
        lines: Vec<ReservationLine>,
        now: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if order_id.is_nil() {
            return Err(DomainError::invalid_id("order id cannot be nil"));
        }
        if lines.is_empty() {
            return Err(DomainError::validation("reservation must have at least one line"));
        }
        Ok(Self {
            id: ReservationId::new(),
            order_id,
            user_id,
            status: ReservationStatus::Active,
            reserved_at: now,
            released_at: None,
            lines,
        })
    }

    /// Rebuild from persisted state.
    pub fn restore(
        id: ReservationId,
        order_id: OrderId,
        user_id: UserId,
        status: ReservationStatus,
        reserved_at: DateTime<Utc>,
        released_at: Option<DateTime<Utc>>,
        lines: Vec<ReservationLine>,
    ) -> Self {
        Self {
            id,
            order_id,
            user_id,
            status,
            reserved_at,
            released_at,
            lines,
        }
    }

    pub fn id_typed(&self) -> ReservationId {
        self.id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == ReservationStatus::Active
    }

    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }

    pub fn released_at(&self) -> Option<DateTime<Utc>> {
        self.released_at
    }

    pub fn lines(&self) -> &[ReservationLine] {
        &self.lines
    }

    /// Transition to RELEASED. Returns `false` if it already was.
    pub fn mark_released(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ReservationStatus::Released {
            return false;
        }
        self.status = ReservationStatus::Released;
        self.released_at = Some(now);
        true
    }
}

impl Entity for StockReservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
