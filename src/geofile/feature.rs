use geojson::{Feature, JsonObject, JsonValue};

/// Open-schema property bag attached to a feature.
pub type Properties = JsonObject;

/// Property key under which the uploader's identity is stored.
pub const USER_INFO_KEY: &str = "UserInfo";

/// Build a GeoJSON feature from a `geo` geometry. Coordinates keep the `geo` convention of
/// x = longitude, y = latitude, which is also GeoJSON's `[lon, lat]` order.
pub fn feature_from_geometry(geometry: &geo::Geometry) -> Feature {
    Feature::from(geojson::Geometry::new(geojson::Value::from(geometry)))
}

/// Merge `properties` into the feature's property bag. Keys from `properties` win, other existing
/// keys are kept. Values are stored verbatim.
pub fn merge_properties(feature: &mut Feature, properties: Properties) {
    match feature.properties.as_mut() {
        Some(existing) => existing.extend(properties),
        None => feature.properties = Some(properties),
    }
}

/// Set the `UserInfo` property on every feature of the collection.
pub fn stamp_user_info(collection: &mut geojson::FeatureCollection, user_info: &JsonObject) {
    for feature in collection.features.iter_mut() {
        feature
            .properties
            .get_or_insert_with(JsonObject::new)
            .insert(USER_INFO_KEY.to_string(), JsonValue::Object(user_info.clone()));
    }
}
