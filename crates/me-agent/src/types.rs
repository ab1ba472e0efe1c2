//! Wire types shared by the backend clients and the redemption core.

use serde::{Deserialize, Deserializer, Serialize};

/// Standard `{ "data": ... }` envelope returned by the ME backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: T,
}

/// Accept a JSON number or a numeric string.
pub(crate) fn number_or_string<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid number {s:?}: {e}"))),
    }
}

fn opt_number_or_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrap(#[serde(deserialize_with = "number_or_string")] f64);

    Option::<Wrap>::deserialize(deserializer).map(|w| w.map(|Wrap(n)| n))
}

// ── Rewards ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub id: String,
    pub contract_address: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// A reward the user holds and how much of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardBalance {
    pub reward: Reward,
    #[serde(deserialize_with = "number_or_string")]
    pub balance: f64,
}

// ── Offers ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferBrand {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferReward {
    pub id: String,
    pub contract_address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, deserialize_with = "opt_number_or_string", skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<f64>,
    #[serde(default, deserialize_with = "opt_number_or_string", skip_serializing_if = "Option::is_none")]
    pub discount_amount: Option<f64>,
    #[serde(default, deserialize_with = "opt_number_or_string", skip_serializing_if = "Option::is_none")]
    pub max_discount_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductVariant {
    pub id: String,
    #[serde(deserialize_with = "number_or_string")]
    pub price: f64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub product_images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferVariant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<String>,
    pub variant: ProductVariant,
    #[serde(default, deserialize_with = "opt_number_or_string", skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<f64>,
}

impl OfferVariant {
    /// Id of the underlying product variant.
    pub fn product_variant_id(&self) -> &str {
        self.variant_id.as_deref().unwrap_or(&self.variant.id)
    }
}

/// Snapshot of an offer, fetched once per offer code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferDetail {
    pub id: String,
    pub brand: OfferBrand,
    pub reward: OfferReward,
    pub redemption_method: RedemptionMethod,
    #[serde(default)]
    pub offer_variants: Vec<OfferVariant>,
    #[serde(default, deserialize_with = "opt_number_or_string", skip_serializing_if = "Option::is_none")]
    pub original_price: Option<f64>,
    #[serde(default, deserialize_with = "opt_number_or_string", skip_serializing_if = "Option::is_none")]
    pub discount_percentage: Option<f64>,
}

impl OfferDetail {
    /// Variant to redeem: the explicit id if given, else the first variant's product variant.
    pub fn resolve_variant_id(&self, selected: Option<&str>) -> Option<String> {
        selected
            .map(str::to_string)
            .or_else(|| {
                self.offer_variants
                    .first()
                    .map(|v| v.product_variant_id().to_string())
            })
    }
}

/// Offer as listed in a brand's catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferSummary {
    pub id: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub brand_id: Option<String>,
    #[serde(default, deserialize_with = "opt_number_or_string")]
    pub discount_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Brand {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BrandWithOffers {
    pub brand: Brand,
    pub offers: Vec<OfferSummary>,
}

// ── Swap & transactions ─────────────────────────────────────────────────

/// Request body for `reward/sdk/swap-amount`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapAmountRequest {
    pub wallet_address: String,
    pub input_reward_address: String,
    pub output_reward_address: String,
    pub redemption_method_id: String,
    pub offer_id: String,
    pub variant_id: Option<String>,
    pub brand_id: String,
}

/// How much of the selected reward an offer costs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapAmount {
    /// Amount of the selected (input) reward to spend.
    #[serde(deserialize_with = "number_or_string")]
    pub amount: f64,
    /// Amount of the offer brand's reward the redemption needs.
    #[serde(deserialize_with = "number_or_string")]
    pub amount_needed: f64,
    #[serde(default = "default_true")]
    pub check_affordability: bool,
}

fn default_true() -> bool {
    true
}

/// Signed meta-transaction tuple produced by the chain runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub hash: String,
    pub from: String,
    pub data: String,
    pub nonce: String,
    pub r: String,
    pub s: String,
    pub v: u8,
}

/// Spend record returned by the push-transaction endpoint.
///
/// Unknown fields are kept so the record can be echoed back verbatim to the
/// refund and order endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub global_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefixed_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushTransactionResult {
    pub result: SpendData,
}

/// Who attests that the spend happened on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verifier {
    Runtime,
    Gelato,
}

/// Request body for `orders/sdk/process-order`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessOrderRequest {
    pub task_id: String,
    pub reward_id: String,
    pub target_reward_id: String,
    pub verifier: Verifier,
    pub spend_data: SpendData,
    pub offer_id: String,
    pub amount: String,
    pub redemption_method_id: String,
    pub offer_variants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coupon {
    pub code: String,
    #[serde(default, deserialize_with = "opt_number_or_string")]
    pub discount_value: Option<f64>,
}

/// Terminal result of a successful redemption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub coupon: Coupon,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutUrlRequest {
    pub brand_id: String,
    pub discount_code: String,
    pub product_variant_id_on_brand_site: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginData {
    pub user: Option<serde_json::Value>,
    pub token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_balance_accepts_string_or_number() {
        let a: RewardBalance = serde_json::from_value(json!({
            "reward": {"id": "r1", "contractAddress": "0xabc", "symbol": "SYM", "name": "Sym"},
            "balance": "12.5"
        }))
        .unwrap();
        assert_eq!(a.balance, 12.5);

        let b: RewardBalance = serde_json::from_value(json!({
            "reward": {"id": "r1", "contractAddress": "0xabc"},
            "balance": 7
        }))
        .unwrap();
        assert_eq!(b.balance, 7.0);
        assert!(b.reward.image.is_none());
    }

    #[test]
    fn test_offer_detail_variant_resolution() {
        let offer: OfferDetail = serde_json::from_value(json!({
            "id": "o1",
            "brand": {"id": "b1"},
            "reward": {"id": "r1", "contractAddress": "0xabc"},
            "redemptionMethod": {"id": "m1", "type": "PERCENTAGE", "discountPercentage": "10"},
            "offerVariants": [
                {"id": "ov1", "variant": {"id": "pv1", "price": 20, "name": "Small"}},
                {"id": "ov2", "variantId": "pv2x", "variant": {"id": "pv2", "price": "30"}}
            ],
            "originalPrice": 20
        }))
        .unwrap();
        assert_eq!(offer.redemption_method.discount_percentage, Some(10.0));
        assert_eq!(offer.resolve_variant_id(None).as_deref(), Some("pv1"));
        assert_eq!(offer.resolve_variant_id(Some("pv9")).as_deref(), Some("pv9"));
        assert_eq!(offer.offer_variants[1].product_variant_id(), "pv2x");
    }

    #[test]
    fn test_offer_without_variants_resolves_none() {
        let offer: OfferDetail = serde_json::from_value(json!({
            "id": "o1",
            "brand": {"id": "b1"},
            "reward": {"id": "r1", "contractAddress": "0xabc"},
            "redemptionMethod": {"id": "m1", "type": "FIXED"}
        }))
        .unwrap();
        assert!(offer.resolve_variant_id(None).is_none());
    }

    #[test]
    fn test_spend_data_preserves_unknown_fields() {
        let raw = json!({
            "hash": "0x01",
            "owner": "0xowner",
            "globalHash": "0x02",
            "taskKind": "spend",
            "count": 3
        });
        let spend: SpendData = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(spend.global_hash.as_deref(), Some("0x02"));
        assert_eq!(serde_json::to_value(&spend).unwrap(), raw);
    }

    #[test]
    fn test_verifier_wire_names() {
        assert_eq!(serde_json::to_value(Verifier::Runtime).unwrap(), json!("RUNTIME"));
        assert_eq!(serde_json::to_value(Verifier::Gelato).unwrap(), json!("GELATO"));
    }
}
