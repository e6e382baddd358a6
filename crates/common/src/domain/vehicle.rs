/// Vehicle entity as reported by the account vehicle-list API.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VehicleInfo {
    pub vin: String,
    pub marketing_name: Option<String>,
    pub variant: Option<String>,
    pub exterior_color: Option<String>,
    pub interior_color: Option<String>,
    pub model_year: Option<i32>,
    pub customized_name: Option<String>,
    pub owner_type: Option<String>,
    pub image_url: Option<String>,
    pub profile_image_url: Option<String>,
    pub warranty_expiration: Option<String>,
    pub warranty_mileage: Option<i64>,
    /// kWh; the upstream reports this as either a number or a numeric string.
    pub battery_capacity_kwh: Option<f64>,
    /// Version of the alias catalogue this vehicle speaks.
    pub alias_version: Option<String>,
    /// Account identifier the upstream expects back as `x-player-identifier`.
    pub player_id: Option<String>,
}
