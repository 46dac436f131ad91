use chrono::NaiveDate;
use common::{AnimalId, FarmerId, Money, Species, UserId};

/// Registers a farmer who supplies animals.
#[derive(Debug, Clone)]
pub struct RegisterFarmer {
    pub name: String,
    pub phone: String,
    pub county: String,
    pub ward: String,
    pub village: Option<String>,
}

/// Registers a new animal on a farm.
#[derive(Debug, Clone)]
pub struct RegisterAnimal {
    pub species: Species,
    pub farmer_id: FarmerId,
    pub sex: Option<String>,
    pub breed: Option<String>,
    pub estimated_dob: Option<NaiveDate>,
}

/// Per-animal purchase data captured at intake.
#[derive(Debug, Clone, PartialEq)]
pub struct IntakeLine {
    pub animal_id: AnimalId,
    pub live_weight_kg: Option<f64>,
    /// Defaults to `scale`.
    pub weight_method: Option<String>,
    pub purchase_price: Option<Money>,
}

impl IntakeLine {
    pub fn new(animal_id: AnimalId) -> Self {
        Self {
            animal_id,
            live_weight_kg: None,
            weight_method: None,
            purchase_price: None,
        }
    }

    pub fn weighed(mut self, kg: f64) -> Self {
        self.live_weight_kg = Some(kg);
        self
    }

    pub fn priced(mut self, price: Money) -> Self {
        self.purchase_price = Some(price);
        self
    }
}

/// Groups on-farm animals of one species into an aggregation batch.
#[derive(Debug, Clone)]
pub struct AggregateAnimals {
    pub species: Species,
    pub site_name: String,
    pub received_on: NaiveDate,
    pub lines: Vec<IntakeLine>,
    pub created_by: Option<UserId>,
}

/// Groups aggregated animals of one species into a processing batch.
#[derive(Debug, Clone)]
pub struct StartProcessing {
    pub species: Species,
    pub facility: String,
    pub slaughter_date: Option<NaiveDate>,
    pub halal_cert_ref: Option<String>,
    pub animal_ids: Vec<AnimalId>,
    pub created_by: Option<UserId>,
}
