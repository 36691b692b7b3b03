use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use stockledger_core::{
    AggregateId, DomainError, DomainResult, Entity, UserId, ValueObject, aggregate_id_newtype,
};

use crate::stock::VariantId;

aggregate_id_newtype!(
    /// Ledger row identifier.
    AdjustmentId
);

/// Why stock moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    PurchaseReceipt,
    Sale,
    ManualCorrection,
    Return,
}

impl AdjustmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AdjustmentType::PurchaseReceipt => "purchase_receipt",
            AdjustmentType::Sale => "sale",
            AdjustmentType::ManualCorrection => "manual_correction",
            AdjustmentType::Return => "return",
        }
    }

    /// Sign rule for the delta carried by this adjustment type.
    fn check_sign(self, quantity: i64) -> DomainResult<()> {
        let ok = match self {
            AdjustmentType::PurchaseReceipt | AdjustmentType::Return => quantity > 0,
            AdjustmentType::Sale => quantity < 0,
            AdjustmentType::ManualCorrection => quantity != 0,
        };
        if ok {
            Ok(())
        } else {
            Err(DomainError::validation(format!(
                "{} adjustment cannot carry quantity {quantity}",
                self.as_str()
            )))
        }
    }
}

impl core::fmt::Display for AdjustmentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for AdjustmentType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase_receipt" => Ok(AdjustmentType::PurchaseReceipt),
            "sale" => Ok(AdjustmentType::Sale),
            "manual_correction" => Ok(AdjustmentType::ManualCorrection),
            "return" => Ok(AdjustmentType::Return),
            other => Err(DomainError::validation(format!(
                "unknown adjustment type '{other}'"
            ))),
        }
    }
}

/// What caused a ledger row.
///
/// For purchase receipts: `document_id` is the purchase order, `line_id` the
/// order item and `operation_id` the receive call that applied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdjustmentReference {
    pub document_id: AggregateId,
    pub line_id: Option<AggregateId>,
    pub operation_id: Uuid,
}

impl ValueObject for AdjustmentReference {}

impl AdjustmentReference {
    pub fn new(document_id: AggregateId, line_id: Option<AggregateId>, operation_id: Uuid) -> Self {
        Self {
            document_id,
            line_id,
            operation_id,
        }
    }

    pub fn refers_to_line(&self, document_id: AggregateId, line_id: AggregateId) -> bool {
        self.document_id == document_id && self.line_id == Some(line_id)
    }
}

/// An adjustment that has not been written to the ledger yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAdjustment {
    pub variant_id: VariantId,
    pub adjustment_type: AdjustmentType,
    pub quantity: i64,
    pub reference: AdjustmentReference,
    pub reason: Option<String>,
    pub created_by: UserId,
}

impl NewAdjustment {
    /// Positive receipt of `quantity` units against a purchase order line.
    pub fn purchase_receipt(
        variant_id: VariantId,
        quantity: i64,
        reference: AdjustmentReference,
        created_by: UserId,
        reason: Option<String>,
    ) -> Self {
        Self {
            variant_id,
            adjustment_type: AdjustmentType::PurchaseReceipt,
            quantity,
            reference,
            reason,
            created_by,
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.adjustment_type.check_sign(self.quantity)?;
        if let Some(reason) = &self.reason {
            if reason.len() > 1024 {
                return Err(DomainError::validation("reason is too long (max 1024 bytes)"));
            }
        }
        Ok(())
    }

    /// Freeze into an immutable ledger row.
    pub fn into_adjustment(
        self,
        id: AdjustmentId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<InventoryAdjustment> {
        self.validate()?;
        Ok(InventoryAdjustment {
            id,
            variant_id: self.variant_id,
            adjustment_type: self.adjustment_type,
            quantity: self.quantity,
            reference: self.reference,
            reason: self.reason,
            created_by: self.created_by,
            created_at,
        })
    }
}

/// Immutable ledger row. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryAdjustment {
    pub id: AdjustmentId,
    pub variant_id: VariantId,
    pub adjustment_type: AdjustmentType,
    /// Signed stock delta.
    pub quantity: i64,
    pub reference: AdjustmentReference,
    pub reason: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
}

impl Entity for InventoryAdjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
