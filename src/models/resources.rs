use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::attachment::{FileAttachment, FileBlob, PhotoRef};
use super::serde_helpers::{deserialize_decimal, deserialize_optional_decimal};

/// Prefix of identifiers handed out for records that only exist in the offline queue.
pub const TEMP_ID_PREFIX: &str = "temp-";

pub fn is_temp_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Generates a placeholder id such as `temp-1712345678901-4f9a1c2be`.
pub fn generate_temp_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "{}{}-{}",
        TEMP_ID_PREFIX,
        Utc::now().timestamp_millis(),
        &suffix[..9]
    )
}

// ===== ENUMS =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceType {
    Farm,
    Crop,
    SoilSample,
    WaterSample,
    PestDisease,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Farm,
        ResourceType::Crop,
        ResourceType::SoilSample,
        ResourceType::WaterSample,
        ResourceType::PestDisease,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Farm => "farm",
            ResourceType::Crop => "crop",
            ResourceType::SoilSample => "soil-sample",
            ResourceType::WaterSample => "water-sample",
            ResourceType::PestDisease => "pest-disease",
        }
    }

    /// REST collection path segment, e.g. `soil-samples`.
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceType::Farm => "farms",
            ResourceType::Crop => "crops",
            ResourceType::SoilSample => "soil-samples",
            ResourceType::WaterSample => "water-samples",
            ResourceType::PestDisease => "pest-disease",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str() == s || t.collection() == s)
            .ok_or_else(|| format!("unknown resource type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PestCategory {
    Pest,
    Disease,
}

impl Default for PestCategory {
    fn default() -> Self {
        PestCategory::Pest
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

// ===== RESPONSE TYPES =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    /// The server accepted the mutation.
    Success,
    /// The mutation is waiting in the offline queue.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldResponse<T> {
    pub status: ResponseStatus,
    pub data: Option<T>,
}

impl<T> FieldResponse<T> {
    pub fn new(status: ResponseStatus, data: Option<T>) -> Self {
        Self { status, data }
    }

    pub fn success(data: Option<T>) -> Self {
        Self::new(ResponseStatus::Success, data)
    }

    pub fn queued(data: Option<T>) -> Self {
        Self::new(ResponseStatus::Queued, data)
    }

    /// True when the response was synthesized locally instead of returned by the server.
    pub fn is_offline(&self) -> bool {
        self.status == ResponseStatus::Queued
    }
}

// ===== DATA STRUCTURES =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Farm<P = PhotoRef> {
    #[serde(default)]
    pub id: Option<String>,
    pub route: String,
    pub name: String,
    pub owner_name: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    pub size_ha: f64,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub latitude: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub longitude: Option<f64>,
    #[serde(default = "none")]
    pub photo: Option<P>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<P> Farm<P> {
    pub fn new(route: String, name: String, owner_name: String, size_ha: f64) -> Self {
        Self {
            id: None,
            route,
            name,
            owner_name,
            size_ha,
            location: None,
            address: None,
            latitude: None,
            longitude: None,
            photo: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn replace_photo<Q>(self, photo: Option<Q>) -> (Farm<Q>, Option<P>) {
        let farm = Farm {
            id: self.id,
            route: self.route,
            name: self.name,
            owner_name: self.owner_name,
            size_ha: self.size_ha,
            location: self.location,
            address: self.address,
            latitude: self.latitude,
            longitude: self.longitude,
            photo,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (farm, self.photo)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Crop {
    #[serde(default)]
    pub id: Option<String>,
    pub farm: String,
    pub crop_type: String,
    #[serde(default)]
    pub variety: Option<String>,
    pub planting_date: NaiveDate,
    #[serde(default)]
    pub expected_harvest: Option<NaiveDate>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Crop {
    pub fn new(farm: String, crop_type: String, planting_date: NaiveDate) -> Self {
        Self {
            id: None,
            farm,
            crop_type,
            variety: None,
            planting_date,
            expected_harvest: None,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilSample<P = PhotoRef> {
    #[serde(default)]
    pub id: Option<String>,
    pub farm: String,
    pub sample_date: NaiveDate,
    #[serde(rename = "pH", deserialize_with = "deserialize_decimal")]
    pub ph: f64,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub moisture_pct: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub nutrient_n: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub nutrient_p: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub nutrient_k: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "none")]
    pub photo: Option<P>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<P> SoilSample<P> {
    pub fn new(farm: String, sample_date: NaiveDate, ph: f64) -> Self {
        Self {
            id: None,
            farm,
            sample_date,
            ph,
            moisture_pct: None,
            nutrient_n: None,
            nutrient_p: None,
            nutrient_k: None,
            notes: None,
            photo: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn replace_photo<Q>(self, photo: Option<Q>) -> (SoilSample<Q>, Option<P>) {
        let sample = SoilSample {
            id: self.id,
            farm: self.farm,
            sample_date: self.sample_date,
            ph: self.ph,
            moisture_pct: self.moisture_pct,
            nutrient_n: self.nutrient_n,
            nutrient_p: self.nutrient_p,
            nutrient_k: self.nutrient_k,
            notes: self.notes,
            photo,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (sample, self.photo)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaterSample<P = PhotoRef> {
    #[serde(default)]
    pub id: Option<String>,
    pub farm: String,
    pub sample_date: NaiveDate,
    pub source: String,
    #[serde(rename = "pH", deserialize_with = "deserialize_decimal")]
    pub ph: f64,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub turbidity: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "none")]
    pub photo: Option<P>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<P> WaterSample<P> {
    pub fn new(farm: String, sample_date: NaiveDate, source: String, ph: f64) -> Self {
        Self {
            id: None,
            farm,
            sample_date,
            source,
            ph,
            turbidity: None,
            notes: None,
            photo: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn replace_photo<Q>(self, photo: Option<Q>) -> (WaterSample<Q>, Option<P>) {
        let sample = WaterSample {
            id: self.id,
            farm: self.farm,
            sample_date: self.sample_date,
            source: self.source,
            ph: self.ph,
            turbidity: self.turbidity,
            notes: self.notes,
            photo,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (sample, self.photo)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PestDiseaseReport<P = PhotoRef> {
    #[serde(default)]
    pub id: Option<String>,
    pub farm: String,
    pub report_date: NaiveDate,
    #[serde(default)]
    pub category: PestCategory,
    pub name: String,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "none")]
    pub photo: Option<P>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub location_lat: Option<f64>,
    #[serde(default, deserialize_with = "deserialize_optional_decimal")]
    pub location_lng: Option<f64>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl<P> PestDiseaseReport<P> {
    pub fn new(farm: String, report_date: NaiveDate, name: String) -> Self {
        Self {
            id: None,
            farm,
            report_date,
            category: PestCategory::default(),
            name,
            severity: Severity::default(),
            description: None,
            photo: None,
            location_lat: None,
            location_lng: None,
            created_at: None,
            updated_at: None,
        }
    }

    fn replace_photo<Q>(self, photo: Option<Q>) -> (PestDiseaseReport<Q>, Option<P>) {
        let report = PestDiseaseReport {
            id: self.id,
            farm: self.farm,
            report_date: self.report_date,
            category: self.category,
            name: self.name,
            severity: self.severity,
            description: self.description,
            photo,
            location_lat: self.location_lat,
            location_lng: self.location_lng,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        (report, self.photo)
    }
}

fn none<T>() -> Option<T> {
    None
}

// ===== PAYLOADS =====

/// One resource record of any type, generic over how its photo is represented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Payload<P> {
    Farm(Farm<P>),
    Crop(Crop),
    SoilSample(SoilSample<P>),
    WaterSample(WaterSample<P>),
    PestDisease(PestDiseaseReport<P>),
}

/// What a form submits.
pub type Submission = Payload<FileBlob>;
/// What the offline queue persists.
pub type RecordPayload = Payload<FileAttachment>;
/// What callers get back.
pub type Resource = Payload<PhotoRef>;

impl<P> Payload<P> {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Payload::Farm(_) => ResourceType::Farm,
            Payload::Crop(_) => ResourceType::Crop,
            Payload::SoilSample(_) => ResourceType::SoilSample,
            Payload::WaterSample(_) => ResourceType::WaterSample,
            Payload::PestDisease(_) => ResourceType::PestDisease,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Payload::Farm(r) => r.id.as_deref(),
            Payload::Crop(r) => r.id.as_deref(),
            Payload::SoilSample(r) => r.id.as_deref(),
            Payload::WaterSample(r) => r.id.as_deref(),
            Payload::PestDisease(r) => r.id.as_deref(),
        }
    }

    /// Whether this resource type has a photo field at all.
    pub fn accepts_photo(&self) -> bool {
        !matches!(self, Payload::Crop(_))
    }

    pub fn photo(&self) -> Option<&P> {
        match self {
            Payload::Farm(r) => r.photo.as_ref(),
            Payload::Crop(_) => None,
            Payload::SoilSample(r) => r.photo.as_ref(),
            Payload::WaterSample(r) => r.photo.as_ref(),
            Payload::PestDisease(r) => r.photo.as_ref(),
        }
    }

    /// Swaps the photo for one of another representation, returning the old one.
    /// A crop has no photo, so `photo` is dropped for it.
    pub fn replace_photo<Q>(self, photo: Option<Q>) -> (Payload<Q>, Option<P>) {
        match self {
            Payload::Farm(r) => {
                let (r, old) = r.replace_photo(photo);
                (Payload::Farm(r), old)
            }
            Payload::Crop(r) => (Payload::Crop(r), None),
            Payload::SoilSample(r) => {
                let (r, old) = r.replace_photo(photo);
                (Payload::SoilSample(r), old)
            }
            Payload::WaterSample(r) => {
                let (r, old) = r.replace_photo(photo);
                (Payload::WaterSample(r), old)
            }
            Payload::PestDisease(r) => {
                let (r, old) = r.replace_photo(photo);
                (Payload::PestDisease(r), old)
            }
        }
    }

    pub fn map_photo<Q>(self, f: impl FnOnce(P) -> Q) -> Payload<Q> {
        let (payload, photo) = self.replace_photo::<()>(None);
        payload.replace_photo(photo.map(f)).0
    }

    pub fn try_map_photo<Q, E>(self, f: impl FnOnce(P) -> Result<Q, E>) -> Result<Payload<Q>, E> {
        let (payload, photo) = self.replace_photo::<()>(None);
        let photo = photo.map(f).transpose()?;
        Ok(payload.replace_photo(photo).0)
    }

    /// Foreign key to the parent farm, for every type that has one.
    pub fn farm_ref_mut(&mut self) -> Option<&mut String> {
        match self {
            Payload::Farm(_) => None,
            Payload::Crop(r) => Some(&mut r.farm),
            Payload::SoilSample(r) => Some(&mut r.farm),
            Payload::WaterSample(r) => Some(&mut r.farm),
            Payload::PestDisease(r) => Some(&mut r.farm),
        }
    }

    /// Sets the identifier and timestamps the server would normally assign.
    pub fn stamp(
        &mut self,
        id: Option<String>,
        created_at: Option<DateTime<Utc>>,
        updated_at: Option<DateTime<Utc>>,
    ) {
        macro_rules! apply {
            ($r:expr) => {{
                if id.is_some() {
                    $r.id = id;
                }
                if created_at.is_some() {
                    $r.created_at = created_at;
                }
                if updated_at.is_some() {
                    $r.updated_at = updated_at;
                }
            }};
        }

        match self {
            Payload::Farm(r) => apply!(r),
            Payload::Crop(r) => apply!(r),
            Payload::SoilSample(r) => apply!(r),
            Payload::WaterSample(r) => apply!(r),
            Payload::PestDisease(r) => apply!(r),
        }
    }
}

impl<P: Serialize> Payload<P> {
    /// Serializes the inner record as a flat JSON object.
    pub fn to_fields(&self) -> serde_json::Result<serde_json::Map<String, serde_json::Value>> {
        let value = match self {
            Payload::Farm(r) => serde_json::to_value(r)?,
            Payload::Crop(r) => serde_json::to_value(r)?,
            Payload::SoilSample(r) => serde_json::to_value(r)?,
            Payload::WaterSample(r) => serde_json::to_value(r)?,
            Payload::PestDisease(r) => serde_json::to_value(r)?,
        };

        match value {
            serde_json::Value::Object(map) => Ok(map),
            _ => Ok(serde_json::Map::new()),
        }
    }
}

impl<P: DeserializeOwned> Payload<P> {
    /// Parses a flat JSON record of a known resource type, such as a server response body.
    pub fn from_value(resource_type: ResourceType, value: serde_json::Value) -> serde_json::Result<Self> {
        Ok(match resource_type {
            ResourceType::Farm => Payload::Farm(serde_json::from_value(value)?),
            ResourceType::Crop => Payload::Crop(serde_json::from_value(value)?),
            ResourceType::SoilSample => Payload::SoilSample(serde_json::from_value(value)?),
            ResourceType::WaterSample => Payload::WaterSample(serde_json::from_value(value)?),
            ResourceType::PestDisease => Payload::PestDisease(serde_json::from_value(value)?),
        })
    }
}

// ===== MUTATIONS =====

/// A create, update or delete against one resource collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutation<P> {
    Create(Payload<P>),
    Update { id: String, payload: Payload<P> },
    Delete { resource_type: ResourceType, id: String },
}

impl<P> Mutation<P> {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Mutation::Create(payload) => payload.resource_type(),
            Mutation::Update { payload, .. } => payload.resource_type(),
            Mutation::Delete { resource_type, .. } => *resource_type,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Mutation::Create(_) => Action::Create,
            Mutation::Update { .. } => Action::Update,
            Mutation::Delete { .. } => Action::Delete,
        }
    }

    pub fn target_id(&self) -> Option<&str> {
        match self {
            Mutation::Create(_) => None,
            Mutation::Update { id, .. } | Mutation::Delete { id, .. } => Some(id),
        }
    }

    pub fn payload(&self) -> Option<&Payload<P>> {
        match self {
            Mutation::Create(payload) | Mutation::Update { payload, .. } => Some(payload),
            Mutation::Delete { .. } => None,
        }
    }

    pub fn photo(&self) -> Option<&P> {
        self.payload().and_then(|p| p.photo())
    }

    pub fn map_photo<Q>(self, f: impl FnOnce(P) -> Q) -> Mutation<Q> {
        match self {
            Mutation::Create(payload) => Mutation::Create(payload.map_photo(f)),
            Mutation::Update { id, payload } => Mutation::Update {
                id,
                payload: payload.map_photo(f),
            },
            Mutation::Delete { resource_type, id } => Mutation::Delete { resource_type, id },
        }
    }

    pub fn try_map_photo<Q, E>(self, f: impl FnOnce(P) -> Result<Q, E>) -> Result<Mutation<Q>, E> {
        Ok(match self {
            Mutation::Create(payload) => Mutation::Create(payload.try_map_photo(f)?),
            Mutation::Update { id, payload } => Mutation::Update {
                id,
                payload: payload.try_map_photo(f)?,
            },
            Mutation::Delete { resource_type, id } => Mutation::Delete { resource_type, id },
        })
    }

    /// Every server identifier this mutation refers to: its target and the parent farm.
    pub fn referenced_ids_mut(&mut self) -> Vec<&mut String> {
        match self {
            Mutation::Create(payload) => payload.farm_ref_mut().into_iter().collect(),
            Mutation::Update { id, payload } => {
                let mut ids = vec![id];
                ids.extend(payload.farm_ref_mut());
                ids
            }
            Mutation::Delete { id, .. } => vec![id],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_type_strings() {
        assert_eq!(ResourceType::SoilSample.as_str(), "soil-sample");
        assert_eq!(ResourceType::SoilSample.collection(), "soil-samples");
        assert_eq!(ResourceType::PestDisease.collection(), "pest-disease");
        assert_eq!("water-sample".parse::<ResourceType>(), Ok(ResourceType::WaterSample));
        assert_eq!("farms".parse::<ResourceType>(), Ok(ResourceType::Farm));
        assert!("route".parse::<ResourceType>().is_err());
        assert_eq!(
            serde_json::to_string(&ResourceType::PestDisease).unwrap(),
            "\"pest-disease\""
        );
    }

    #[test]
    fn test_server_decimals_as_strings() {
        let body = serde_json::json!({
            "id": "3f1c0a4e-9d1b-4a53-a2f2-0d5d7f6a9b10",
            "farm": "b5a8e1c2-7f0e-4b8e-9d6a-2c4e5f7a8b90",
            "farm_name": "North Plot",
            "sample_date": "2024-03-02",
            "pH": "6.40",
            "moisture_pct": "21.75",
            "nutrient_n": null,
            "nutrient_p": "",
            "nutrient_k": 12.5,
            "notes": null,
            "photo": "http://localhost:8000/media/soil_samples/2024/03/a.jpg",
            "created_at": "2024-03-02T09:15:00.123456Z",
            "updated_at": "2024-03-02T09:15:00.123456Z"
        });

        let resource = Resource::from_value(ResourceType::SoilSample, body).unwrap();
        let Payload::SoilSample(sample) = resource else {
            panic!("expected soil sample");
        };
        assert_eq!(sample.ph, 6.4);
        assert_eq!(sample.moisture_pct, Some(21.75));
        assert_eq!(sample.nutrient_n, None);
        assert_eq!(sample.nutrient_p, None);
        assert_eq!(sample.nutrient_k, Some(12.5));
        assert!(matches!(sample.photo, Some(PhotoRef::Url(_))));
        assert!(sample.created_at.is_some());
    }

    #[test]
    fn test_map_photo_keeps_fields() {
        let mut farm: Farm<FileBlob> =
            Farm::new("route-1".into(), "Hillside".into(), "A. Mwangi".into(), 4.5);
        farm.photo = Some(FileBlob::from_bytes("gate.png", "image/png", vec![1, 2, 3]));

        let mapped = Payload::Farm(farm).map_photo(|blob| blob.name);
        let Payload::Farm(farm) = mapped else {
            panic!("expected farm");
        };
        assert_eq!(farm.photo.as_deref(), Some("gate.png"));
        assert_eq!(farm.name, "Hillside");
        assert_eq!(farm.size_ha, 4.5);
    }

    #[test]
    fn test_crop_has_no_photo() {
        let crop = Payload::<FileBlob>::Crop(Crop::new(
            "farm-1".into(),
            "Maize".into(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        ));
        assert!(!crop.accepts_photo());
        let (crop, old) = crop.replace_photo(Some("ignored".to_string()));
        assert!(old.is_none());
        assert!(crop.photo().is_none());
    }

    #[test]
    fn test_referenced_ids() {
        let mut update: Mutation<FileBlob> = Mutation::Update {
            id: "temp-1".into(),
            payload: Payload::Crop(Crop::new(
                "temp-2".into(),
                "Beans".into(),
                NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            )),
        };

        let ids: Vec<String> = update.referenced_ids_mut().into_iter().map(|s| s.clone()).collect();
        assert_eq!(ids, vec!["temp-1".to_string(), "temp-2".to_string()]);

        for id in update.referenced_ids_mut() {
            id.push_str("-x");
        }
        assert_eq!(update.target_id(), Some("temp-1-x"));
        assert_eq!(update.action(), Action::Update);
        assert_eq!(update.resource_type(), ResourceType::Crop);

        let mut farm_create: Mutation<FileBlob> = Mutation::Create(Payload::Farm(Farm::new(
            "route-1".into(),
            "Hillside".into(),
            "A. Mwangi".into(),
            1.0,
        )));
        assert!(farm_create.referenced_ids_mut().is_empty());
        assert!(is_temp_id("temp-1712-abc"));
        assert!(is_temp_id(&generate_temp_id()));
        assert_ne!(generate_temp_id(), generate_temp_id());
        assert!(!is_temp_id("3f1c0a4e"));
    }

    #[test]
    fn test_stamp_sets_server_fields() {
        let mut payload = Resource::Crop(Crop::new(
            "farm-1".into(),
            "Sorghum".into(),
            NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
        ));
        let now = Utc::now();
        payload.stamp(Some("temp-1".into()), None, Some(now));

        assert_eq!(payload.id(), Some("temp-1"));
        let Payload::Crop(crop) = payload else {
            panic!("expected crop");
        };
        assert_eq!(crop.created_at, None);
        assert_eq!(crop.updated_at, Some(now));
    }
}
