use reqwest::Url;
use serde::Serialize;

use crate::error::ShipmentError;

pub const CURRENCY: &str = "INR";
const NOTE: &str = "Shipment Payment";

/// UPI account that receives shipment payments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAccount {
    pub upi_id: String,
    pub payee_name: String,
}

/// What the user pays to: shown as text and rendered as a QR code by the
/// client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTarget {
    pub upi_id: String,
    pub payee_name: String,
    pub amount: f64,
    pub currency: &'static str,
    pub uri: String,
}

impl PaymentAccount {
    pub fn new(upi_id: impl Into<String>, payee_name: impl Into<String>) -> Self {
        Self {
            upi_id: upi_id.into(),
            payee_name: payee_name.into(),
        }
    }

    pub fn target(&self, amount: f64) -> Result<PaymentTarget, ShipmentError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(ShipmentError::invalid("amount", "must be a finite, non-negative number"));
        }
        let amount_text = amount.to_string();
        let uri = Url::parse_with_params(
            "upi://pay",
            &[
                ("pa", self.upi_id.as_str()),
                ("pn", self.payee_name.as_str()),
                ("am", amount_text.as_str()),
                ("cu", CURRENCY),
                ("tn", NOTE),
            ],
        )
        .map_err(|e| ShipmentError::invalid("upiId", e.to_string()))?;

        Ok(PaymentTarget {
            upi_id: self.upi_id.clone(),
            payee_name: self.payee_name.clone(),
            amount,
            currency: CURRENCY,
            uri: uri.to_string(),
        })
    }
}

/// Normalizes the user-entered proof of payment. The reference is not
/// checked against any ledger; it only has to be present.
pub fn transaction_reference(raw: &str) -> Result<String, ShipmentError> {
    let reference = raw.trim();
    if reference.is_empty() {
        return Err(ShipmentError::missing("transactionId"));
    }
    Ok(reference.to_string())
}
