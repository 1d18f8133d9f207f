use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ShipmentError;
use crate::store::StoreError;

/// Package size as chosen on the creation form; drives the base price.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageSize {
    #[default]
    Small,
    Medium,
    Large,
    ExtraLarge,
}

impl PackageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
            Self::ExtraLarge => "extra-large",
        }
    }
}

impl fmt::Display for PackageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Delivery status of a shipment. Only admins move it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShipmentStatus {
    #[default]
    Pending,
    InTransit,
    Delivered,
    NotDelivered,
    Returned,
}

impl ShipmentStatus {
    pub const ALL: [ShipmentStatus; 5] = [
        Self::Pending,
        Self::InTransit,
        Self::Delivered,
        Self::NotDelivered,
        Self::Returned,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InTransit => "in-transit",
            Self::Delivered => "delivered",
            Self::NotDelivered => "not-delivered",
            Self::Returned => "returned",
        }
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentStatus {
    #[default]
    PendingVerification,
    Verified,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingVerification => "pending-verification",
            Self::Verified => "verified",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package weight in kilograms, between zero and [`Weight::MAX_KG`].
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Weight(f64);

impl Weight {
    pub const ZERO: Weight = Weight(0.0);

    /// Heaviest package accepted. Keeps every computed price finite.
    pub const MAX_KG: f64 = 10_000.0;

    pub fn new(kg: f64) -> Result<Self, ShipmentError> {
        if !kg.is_finite() {
            return Err(ShipmentError::invalid("packageWeight", "must be a finite number"));
        }
        if kg < 0.0 {
            return Err(ShipmentError::invalid("packageWeight", "cannot be negative"));
        }
        if kg > Self::MAX_KG {
            return Err(ShipmentError::invalid(
                "packageWeight",
                format!("cannot exceed {} kg", Self::MAX_KG),
            ));
        }
        Ok(Self(kg))
    }

    /// Parses the weight field of the creation form.
    ///
    /// An empty field is a missing required field. Text that is not a number
    /// prices as zero weight.
    pub fn parse(raw: &str) -> Result<Self, ShipmentError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ShipmentError::missing("packageWeight"));
        }
        match raw.parse::<f64>() {
            Ok(kg) if kg.is_nan() => Ok(Self::ZERO),
            Ok(kg) => Self::new(kg),
            Err(_) => Ok(Self::ZERO),
        }
    }

    /// Parsing used by the standalone estimator: anything unusable is zero.
    pub fn lenient(raw: &str) -> Self {
        raw.trim()
            .parse::<f64>()
            .ok()
            .and_then(|kg| Self::new(kg).ok())
            .unwrap_or(Self::ZERO)
    }

    pub fn kg(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Weight {
    type Error = ShipmentError;

    fn try_from(kg: f64) -> Result<Self, Self::Error> {
        Self::new(kg)
    }
}

impl From<Weight> for f64 {
    fn from(weight: Weight) -> f64 {
        weight.0
    }
}

/// Raw shipment creation form as submitted by a user.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShipmentForm {
    #[serde(default)]
    pub sender_name: String,
    #[serde(default)]
    pub sender_address: String,
    #[serde(default)]
    pub sender_phone: String,
    #[serde(default)]
    pub receiver_name: String,
    #[serde(default)]
    pub receiver_address: String,
    #[serde(default)]
    pub receiver_phone: String,
    #[serde(default)]
    pub package_size: PackageSize,
    #[serde(default, deserialize_with = "number_or_text")]
    pub package_weight: String,
    #[serde(default)]
    pub package_description: String,
}

/// A creation form that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageDetails {
    pub sender_name: String,
    pub sender_address: String,
    pub sender_phone: String,
    pub receiver_name: String,
    pub receiver_address: String,
    pub receiver_phone: String,
    pub package_size: PackageSize,
    pub package_weight: Weight,
    pub package_description: String,
}

impl ShipmentForm {
    pub fn validate(&self) -> Result<PackageDetails, ShipmentError> {
        Ok(PackageDetails {
            sender_name: required("senderName", &self.sender_name)?,
            sender_address: required("senderAddress", &self.sender_address)?,
            sender_phone: required("senderPhone", &self.sender_phone)?,
            receiver_name: required("receiverName", &self.receiver_name)?,
            receiver_address: required("receiverAddress", &self.receiver_address)?,
            receiver_phone: required("receiverPhone", &self.receiver_phone)?,
            package_size: self.package_size,
            package_weight: Weight::parse(&self.package_weight)?,
            package_description: self.package_description.trim().to_string(),
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<String, ShipmentError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ShipmentError::missing(field));
    }
    Ok(value.to_string())
}

fn number_or_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n.to_string(),
        Raw::Text(s) => s,
    })
}

/// Shipment as written by the creation flow, before the store assigns an id.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewShipment {
    pub tracking_number: String,
    pub sender_name: String,
    pub sender_address: String,
    pub sender_phone: String,
    pub receiver_name: String,
    pub receiver_address: String,
    pub receiver_phone: String,
    pub package_size: PackageSize,
    pub package_weight: Weight,
    pub package_description: String,
    pub status: ShipmentStatus,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
    pub amount: f64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewShipment {
    pub fn into_shipment(self, id: String) -> Shipment {
        Shipment {
            id,
            tracking_number: self.tracking_number,
            sender_name: self.sender_name,
            sender_address: self.sender_address,
            sender_phone: self.sender_phone,
            receiver_name: self.receiver_name,
            receiver_address: self.receiver_address,
            receiver_phone: self.receiver_phone,
            package_size: self.package_size,
            package_weight: self.package_weight,
            package_description: self.package_description,
            status: self.status,
            payment_status: self.payment_status,
            transaction_id: self.transaction_id,
            amount: self.amount,
            user_id: self.user_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// A persisted shipment document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Shipment {
    pub id: String,
    pub tracking_number: String,
    pub sender_name: String,
    pub sender_address: String,
    pub sender_phone: String,
    pub receiver_name: String,
    pub receiver_address: String,
    pub receiver_phone: String,
    pub package_size: PackageSize,
    pub package_weight: Weight,
    pub package_description: String,
    pub status: ShipmentStatus,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
    pub amount: f64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Shipment {
    /// Decodes a raw store document, rejecting unknown and missing fields.
    pub fn from_document(document: Value) -> Result<Self, StoreError> {
        serde_json::from_value(document).map_err(StoreError::Schema)
    }
}

/// What the public tracking page may show about a shipment. Ownership and
/// payment fields stay private to the owner and admins.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicShipment {
    pub tracking_number: String,
    pub sender_name: String,
    pub sender_address: String,
    pub sender_phone: String,
    pub receiver_name: String,
    pub receiver_address: String,
    pub receiver_phone: String,
    pub package_size: PackageSize,
    pub package_weight: Weight,
    pub package_description: String,
    pub status: ShipmentStatus,
    pub updated_at: DateTime<Utc>,
}

impl From<Shipment> for PublicShipment {
    fn from(shipment: Shipment) -> Self {
        Self {
            tracking_number: shipment.tracking_number,
            sender_name: shipment.sender_name,
            sender_address: shipment.sender_address,
            sender_phone: shipment.sender_phone,
            receiver_name: shipment.receiver_name,
            receiver_address: shipment.receiver_address,
            receiver_phone: shipment.receiver_phone,
            package_size: shipment.package_size,
            package_weight: shipment.package_weight,
            package_description: shipment.package_description,
            status: shipment.status,
            updated_at: shipment.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn filled_form() -> ShipmentForm {
        ShipmentForm {
            sender_name: "Asha".to_string(),
            sender_address: "12 MG Road, Pune".to_string(),
            sender_phone: "9800000001".to_string(),
            receiver_name: "Ravi".to_string(),
            receiver_address: "4 Park Street, Kolkata".to_string(),
            receiver_phone: "9800000002".to_string(),
            package_size: PackageSize::Medium,
            package_weight: "2.5".to_string(),
            package_description: "Books".to_string(),
        }
    }

    #[test]
    fn wire_names_are_kebab_case() {
        assert_eq!(serde_json::to_value(PackageSize::ExtraLarge).unwrap(), json!("extra-large"));
        assert_eq!(serde_json::to_value(ShipmentStatus::InTransit).unwrap(), json!("in-transit"));
        assert_eq!(serde_json::to_value(ShipmentStatus::NotDelivered).unwrap(), json!("not-delivered"));
        assert_eq!(
            serde_json::to_value(PaymentStatus::PendingVerification).unwrap(),
            json!("pending-verification")
        );
        for status in ShipmentStatus::ALL {
            assert_eq!(serde_json::to_value(status).unwrap(), json!(status.as_str()));
        }
    }

    #[test]
    fn weight_parsing_follows_form_rules() {
        assert_eq!(Weight::parse("3.5").unwrap().kg(), 3.5);
        assert_eq!(Weight::parse("heavy").unwrap(), Weight::ZERO);
        assert!(matches!(
            Weight::parse("   "),
            Err(ShipmentError::MissingField { field: "packageWeight" })
        ));
        assert!(Weight::parse("-1").unwrap_err().is_validation());
        assert_eq!(Weight::lenient(""), Weight::ZERO);
        assert_eq!(Weight::lenient("-4"), Weight::ZERO);
        assert_eq!(Weight::lenient("1.2").kg(), 1.2);
    }

    #[test]
    fn weight_is_capped() {
        assert_eq!(Weight::parse("10000").unwrap().kg(), Weight::MAX_KG);
        for raw in ["10000.5", "1e308", "inf"] {
            let err = Weight::parse(raw).unwrap_err();
            assert!(err.is_validation(), "{raw}");
        }
        assert!(serde_json::from_value::<Weight>(json!(1e308)).is_err());
    }

    #[test]
    fn weight_rejects_negative_json() {
        let err = serde_json::from_value::<Weight>(json!(-2.0));
        assert!(err.is_err());
    }

    #[test]
    fn validate_trims_and_requires_parties() {
        let mut form = filled_form();
        form.sender_name = "  Asha  ".to_string();
        let details = form.validate().unwrap();
        assert_eq!(details.sender_name, "Asha");
        assert_eq!(details.package_weight.kg(), 2.5);

        form.receiver_phone = " ".to_string();
        assert!(matches!(
            form.validate(),
            Err(ShipmentError::MissingField { field: "receiverPhone" })
        ));
    }

    #[test]
    fn description_is_optional() {
        let mut form = filled_form();
        form.package_description.clear();
        assert_eq!(form.validate().unwrap().package_description, "");
    }

    #[test]
    fn form_accepts_numeric_weight() {
        let form: ShipmentForm = serde_json::from_value(json!({
            "senderName": "A",
            "packageSize": "large",
            "packageWeight": 4
        }))
        .unwrap();
        assert_eq!(form.package_size, PackageSize::Large);
        assert_eq!(form.package_weight, "4");
    }

    #[test]
    fn document_decoding_is_strict() {
        let now = Utc::now();
        let shipment = NewShipment {
            tracking_number: "ST12345678ABCD".to_string(),
            sender_name: "A".to_string(),
            sender_address: "B".to_string(),
            sender_phone: "C".to_string(),
            receiver_name: "D".to_string(),
            receiver_address: "E".to_string(),
            receiver_phone: "F".to_string(),
            package_size: PackageSize::Small,
            package_weight: Weight::ZERO,
            package_description: String::new(),
            status: ShipmentStatus::Pending,
            payment_status: PaymentStatus::PendingVerification,
            transaction_id: "UPI123".to_string(),
            amount: 100.0,
            user_id: "u1".to_string(),
            created_at: now,
            updated_at: now,
        }
        .into_shipment("doc-1".to_string());

        let document = serde_json::to_value(&shipment).unwrap();
        assert_eq!(Shipment::from_document(document.clone()).unwrap(), shipment);

        let mut extra = document.clone();
        extra["discount"] = json!(10);
        assert!(matches!(Shipment::from_document(extra), Err(StoreError::Schema(_))));

        let mut missing = document;
        missing.as_object_mut().unwrap().remove("amount");
        assert!(matches!(Shipment::from_document(missing), Err(StoreError::Schema(_))));
    }

    #[test]
    fn public_view_hides_owner_and_payment() {
        let now = Utc::now();
        let shipment = NewShipment {
            tracking_number: "ST12345678ABCD".to_string(),
            sender_name: "A".to_string(),
            sender_address: "B".to_string(),
            sender_phone: "C".to_string(),
            receiver_name: "D".to_string(),
            receiver_address: "E".to_string(),
            receiver_phone: "F".to_string(),
            package_size: PackageSize::Large,
            package_weight: Weight::ZERO,
            package_description: "Lamp".to_string(),
            status: ShipmentStatus::InTransit,
            payment_status: PaymentStatus::Verified,
            transaction_id: "UPI123".to_string(),
            amount: 300.0,
            user_id: "u1".to_string(),
            created_at: now,
            updated_at: now,
        }
        .into_shipment("doc-1".to_string());

        let public = serde_json::to_value(PublicShipment::from(shipment)).unwrap();
        for hidden in ["id", "userId", "transactionId", "amount", "paymentStatus", "createdAt"] {
            assert!(public.get(hidden).is_none(), "{hidden} leaked");
        }
        assert_eq!(public["status"], json!("in-transit"));
        assert_eq!(public["trackingNumber"], json!("ST12345678ABCD"));
    }
}
