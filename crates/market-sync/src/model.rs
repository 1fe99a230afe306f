//! Domain types: principals, listings, patches and snapshots.

use serde::{Deserialize, Serialize};

use crate::validation::{FormValues, ValidationErrors, listing_schema};

/// Identifier assigned by the remote store when a listing is created.
pub type ListingId = String;

/// The authenticated identity of the current user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Opaque provider identifier
    pub id: String,
    /// Unique email, used as the ownership key for listings
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

impl Principal {
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            display_name: None,
            avatar_url: None,
        }
    }
}

/// The user-editable half of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingFields {
    pub name: String,
    pub category: String,
    pub quantity: u32,
    pub available: bool,
    pub selling_price: f64,
    /// Reference to an externally hosted cover image
    #[serde(default, rename = "coverImageRef", skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
}

impl ListingFields {
    /// Render as form input, keyed by remote field names.
    pub fn to_form_values(&self) -> FormValues {
        let mut values = FormValues::new();
        values.insert("name".into(), self.name.clone());
        values.insert("category".into(), self.category.clone());
        values.insert("quantity".into(), self.quantity.to_string());
        values.insert("available".into(), self.available.to_string());
        values.insert("sellingPrice".into(), self.selling_price.to_string());
        if let Some(cover) = &self.cover_image {
            values.insert("coverImageRef".into(), cover.clone());
        }
        values
    }

    /// Validate and parse form input.
    ///
    /// A blank `available` defaults to in stock when quantity is positive.
    pub fn from_form_values(values: &FormValues) -> Result<Self, ValidationErrors> {
        listing_schema().validate(values)?;

        let text = |key: &str| values.get(key).map(|v| v.trim()).unwrap_or_default();
        let quantity = text("quantity")
            .parse::<u32>()
            .map_err(|_| ValidationErrors::single("quantity", "Quantity is required"))?;
        let selling_price = text("sellingPrice")
            .parse::<f64>()
            .map_err(|_| ValidationErrors::single("sellingPrice", "Selling price is required"))?;
        let available = match text("available") {
            "" => quantity > 0,
            other => other == "true",
        };
        let cover_image = Some(text("coverImageRef"))
            .filter(|c| !c.is_empty())
            .map(str::to_string);

        Ok(Self {
            name: text("name").to_string(),
            category: text("category").to_string(),
            quantity,
            available,
            selling_price,
            cover_image,
        })
    }

    pub fn validate(&self) -> Result<(), ValidationErrors> {
        listing_schema().validate(&self.to_form_values())
    }
}

/// A book offered for sale.
///
/// `id` and `seller_email` are fixed at creation; only `fields` ever change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    pub id: ListingId,
    pub seller_email: String,
    #[serde(flatten)]
    pub fields: ListingFields,
}

impl Listing {
    pub fn stock_status(&self) -> StockStatus {
        StockStatus::from_available(self.fields.available)
    }

    /// Whether this listing belongs to the given principal.
    pub fn is_owned_by(&self, principal: &Principal) -> bool {
        self.seller_email == principal.email
    }
}

/// Availability badge shown next to each listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StockStatus {
    InStock,
    OutOfStock,
}

impl StockStatus {
    pub fn from_available(available: bool) -> Self {
        if available {
            StockStatus::InStock
        } else {
            StockStatus::OutOfStock
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StockStatus::InStock => "In Stock",
            StockStatus::OutOfStock => "Out of Stock",
        }
    }
}

impl std::fmt::Display for StockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Partial update of a listing's mutable fields.
///
/// Identity fields (`id`, `sellerEmail`) cannot be expressed here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selling_price: Option<f64>,
    #[serde(default, rename = "coverImageRef", skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
}

impl ListingPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.category.is_none()
            && self.quantity.is_none()
            && self.available.is_none()
            && self.selling_price.is_none()
            && self.cover_image.is_none()
    }

    /// Marks a listing as sold out.
    pub fn sold_out() -> Self {
        Self {
            quantity: Some(0),
            available: Some(false),
            ..Self::default()
        }
    }

    /// Form input for the fields present in this patch.
    pub fn to_form_values(&self) -> FormValues {
        let mut values = FormValues::new();
        if let Some(name) = &self.name {
            values.insert("name".into(), name.clone());
        }
        if let Some(category) = &self.category {
            values.insert("category".into(), category.clone());
        }
        if let Some(quantity) = self.quantity {
            values.insert("quantity".into(), quantity.to_string());
        }
        if let Some(available) = self.available {
            values.insert("available".into(), available.to_string());
        }
        if let Some(price) = self.selling_price {
            values.insert("sellingPrice".into(), price.to_string());
        }
        if let Some(cover) = &self.cover_image {
            values.insert("coverImageRef".into(), cover.clone());
        }
        values
    }

    /// Validate the present fields. An empty patch is rejected.
    pub fn validate(&self) -> Result<(), ValidationErrors> {
        if self.is_empty() {
            return Err(ValidationErrors::single("patch", "Nothing to update"));
        }
        listing_schema().validate_present(&self.to_form_values())
    }

    /// Patch that rewrites every mutable field to `fields`.
    pub fn replace_all(fields: &ListingFields) -> Self {
        Self {
            name: Some(fields.name.clone()),
            category: Some(fields.category.clone()),
            quantity: Some(fields.quantity),
            available: Some(fields.available),
            selling_price: Some(fields.selling_price),
            cover_image: fields.cover_image.clone(),
        }
    }
}

/// The complete set of listings matching a subscription at one moment.
///
/// Always replaces the previous snapshot wholesale. Order is whatever the
/// backend delivered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    listings: Vec<Listing>,
}

impl Snapshot {
    pub fn new(listings: Vec<Listing>) -> Self {
        Self { listings }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn listings(&self) -> &[Listing] {
        &self.listings
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Listing> {
        self.listings.iter()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Listing> {
        self.listings.iter().find(|l| l.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.listings.iter().map(|l| l.id.as_str()).collect()
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Listing;
    type IntoIter = std::slice::Iter<'a, Listing>;

    fn into_iter(self) -> Self::IntoIter {
        self.listings.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(name: &str, available: bool) -> ListingFields {
        ListingFields {
            name: name.into(),
            category: "CSE".into(),
            quantity: 1,
            available,
            selling_price: 250.0,
            cover_image: None,
        }
    }

    #[test]
    fn test_listing_uses_remote_field_names() {
        let listing = Listing {
            id: "1".into(),
            seller_email: "a@x.edu".into(),
            fields: ListingFields {
                cover_image: Some("img/algo.png".into()),
                ..fields("Algo", true)
            },
        };

        let json = serde_json::to_value(&listing).unwrap();
        assert_eq!(json["sellerEmail"], "a@x.edu");
        assert_eq!(json["sellingPrice"], 250.0);
        assert_eq!(json["coverImageRef"], "img/algo.png");
        assert_eq!(json["name"], "Algo");
    }

    #[test]
    fn test_stock_status_labels() {
        let mut listing = Listing {
            id: "1".into(),
            seller_email: "a@x.edu".into(),
            fields: fields("Algo", true),
        };
        assert_eq!(listing.stock_status().label(), "In Stock");

        listing.fields.available = false;
        assert_eq!(listing.stock_status().to_string(), "Out of Stock");
    }

    #[test]
    fn test_patch_serializes_only_present_fields() {
        let patch = ListingPatch::sold_out();
        let json = serde_json::to_value(&patch).unwrap();
        let obj = json.as_object().unwrap();

        assert_eq!(obj.len(), 2);
        assert_eq!(obj["quantity"], 0);
        assert_eq!(obj["available"], false);
        assert!(!patch.is_empty());
        assert!(ListingPatch::default().is_empty());
    }

    #[test]
    fn test_fields_from_form_values() {
        let mut values = fields("Algo", true).to_form_values();
        values.remove("available");
        values.insert("quantity".into(), " 0 ".into());

        let parsed = ListingFields::from_form_values(&values).unwrap();
        assert_eq!(parsed.quantity, 0);
        assert!(!parsed.available);
        assert_eq!(parsed.selling_price, 250.0);
        assert_eq!(parsed.cover_image, None);
    }

    #[test]
    fn test_fields_validation_rejects_negative_price() {
        let mut bad = fields("Algo", true);
        bad.selling_price = -1.0;
        let errors = bad.validate().unwrap_err();
        assert!(errors.get("sellingPrice").is_some());

        bad.selling_price = f64::NAN;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_patch_validation() {
        assert!(ListingPatch::default().validate().is_err());
        assert!(ListingPatch::sold_out().validate().is_ok());

        let blank_name = ListingPatch {
            name: Some(" ".into()),
            ..ListingPatch::default()
        };
        assert_eq!(
            blank_name.validate().unwrap_err().get("name"),
            Some("Book name is required")
        );
    }

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = Snapshot::new(vec![
            Listing {
                id: "1".into(),
                seller_email: "a@x.edu".into(),
                fields: fields("Algo", true),
            },
            Listing {
                id: "2".into(),
                seller_email: "a@x.edu".into(),
                fields: fields("Calc", true),
            },
        ]);

        assert_eq!(snapshot.ids(), vec!["1", "2"]);
        assert!(snapshot.contains("2"));
        assert!(!snapshot.contains("3"));
        assert_eq!(snapshot.get("2").map(|l| l.fields.name.as_str()), Some("Calc"));
    }
}
