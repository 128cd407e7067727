//! Demo marina providers backed by in-memory fixtures.

use crate::tools::{PluginRegistry, ProviderManifest, ProviderPlugin, ToolError, ToolManifest};
use serde_json::{json, Value as Json};

struct Vessel {
    mmsi: &'static str,
    name: &'static str,
    lat: f64,
    lon: f64,
    speed_knots: f64,
    status: &'static str,
}

const VESSELS: &[Vessel] = &[
    Vessel {
        mmsi: "366123456",
        name: "Sea Breeze",
        lat: 37.8083,
        lon: -122.4156,
        speed_knots: 0.0,
        status: "moored",
    },
    Vessel {
        mmsi: "366987654",
        name: "Blue Heron",
        lat: 37.7955,
        lon: -122.3937,
        speed_knots: 6.5,
        status: "under way",
    },
    Vessel {
        mmsi: "367555001",
        name: "Northern Star",
        lat: 37.8199,
        lon: -122.4783,
        speed_knots: 11.2,
        status: "under way",
    },
];

struct Berth {
    id: &'static str,
    dock: &'static str,
    length_m: f64,
    power_amps: u32,
    occupied: bool,
}

const BERTHS: &[Berth] = &[
    Berth { id: "A-01", dock: "A", length_m: 12.0, power_amps: 30, occupied: true },
    Berth { id: "A-02", dock: "A", length_m: 12.0, power_amps: 30, occupied: false },
    Berth { id: "B-07", dock: "B", length_m: 18.0, power_amps: 50, occupied: false },
    Berth { id: "C-12", dock: "C", length_m: 24.0, power_amps: 100, occupied: true },
    Berth { id: "C-14", dock: "C", length_m: 30.0, power_amps: 100, occupied: false },
];

/// `vessel`, `port` and `berth`, in that registration order.
pub fn marina_plugins() -> PluginRegistry {
    PluginRegistry::new()
        .with(vessel_plugin())
        .with(port_plugin())
        .with(berth_plugin())
}

fn manifest(description: &str, parameters: &str) -> ToolManifest {
    ToolManifest {
        description: description.to_string(),
        parameters: toml::from_str(parameters).unwrap_or_default(),
        ..ToolManifest::default()
    }
}

fn vessel_plugin() -> ProviderPlugin {
    let manifest = ProviderManifest::new("vessel")
        .category("navigation")
        .describe("AIS-backed vessel data")
        .tool(
            "vessel_tracking",
            manifest(
                "Real-time vessel position lookup",
                "mmsi = { type = \"string\", required = false }",
            ),
        );
    ProviderPlugin::new("vessel")
        .with_manifest(manifest)
        .entry("vessel_tracking", vessel_tracking)
}

fn port_plugin() -> ProviderPlugin {
    let manifest = ProviderManifest::new("port")
        .category("facilities")
        .describe("Harbor and port facilities")
        .tool(
            "port_info",
            manifest(
                "Port facility lookup",
                "code = { type = \"string\", required = false }",
            ),
        );
    // Exported under the unit's own name rather than `execute`.
    ProviderPlugin::new("port")
        .with_manifest(manifest)
        .export("port_info", "port_info", port_info)
}

fn berth_plugin() -> ProviderPlugin {
    let manifest = ProviderManifest::new("berth")
        .category("operations")
        .describe("Slip and berth management")
        .tool(
            "berth_availability",
            manifest(
                "Open slips filtered by minimum length in meters",
                "min_length_m = { type = \"number\", required = false }",
            ),
        )
        .tool(
            "berth_reservation",
            manifest(
                "Quote a slip booking for a boat and date range",
                "berth = { type = \"string\", required = true }\nnights = { type = \"integer\", required = true }",
            ),
        );
    ProviderPlugin::new("berth")
        .with_manifest(manifest)
        .entry("berth_availability", berth_availability)
        .entry("berth_reservation", berth_reservation)
}

fn str_param<'a>(params: &'a Json, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Json::as_str).or_else(|| params.as_str())
}

fn vessel_tracking(params: Json) -> Result<Json, ToolError> {
    let positions = |v: &Vessel| {
        json!({
            "mmsi": v.mmsi,
            "name": v.name,
            "lat": v.lat,
            "lon": v.lon,
            "speed_knots": v.speed_knots,
            "status": v.status,
        })
    };
    match str_param(&params, "mmsi") {
        None => Ok(Json::Array(VESSELS.iter().map(positions).collect())),
        Some(mmsi) => VESSELS
            .iter()
            .find(|v| v.mmsi == mmsi.trim_start_matches("MMSI").trim())
            .map(positions)
            .ok_or_else(|| ToolError::not_found(format!("no vessel with MMSI {}", mmsi))),
    }
}

fn port_info(params: Json) -> Result<Json, ToolError> {
    let code = str_param(&params, "code").unwrap_or("SFO-M1");
    if !code.eq_ignore_ascii_case("SFO-M1") {
        return Err(ToolError::not_found(format!("unknown port {}", code)));
    }
    Ok(json!({
        "code": "SFO-M1",
        "name": "Pier 39 Marina",
        "max_draft_m": 4.5,
        "fuel": ["diesel", "gasoline"],
        "berths": BERTHS.len(),
        "harbormaster": {
            "name": "Jordan Lee",
            "email": "harbormaster@pier39marina.example",
            "phone": "415-555-0142",
        },
        "gate_code": "4417",
        "wifi_password": "saltwater",
    }))
}

fn berth_availability(params: Json) -> Result<Json, ToolError> {
    let min_length = match params.get("min_length_m") {
        None | Some(Json::Null) => 0.0,
        Some(value) => value
            .as_f64()
            .ok_or_else(|| ToolError::invalid("min_length_m must be a number"))?,
    };
    let open: Vec<Json> = BERTHS
        .iter()
        .filter(|b| !b.occupied && b.length_m >= min_length)
        .map(|b| {
            json!({
                "id": b.id,
                "dock": b.dock,
                "length_m": b.length_m,
                "power_amps": b.power_amps,
            })
        })
        .collect();
    Ok(Json::Array(open))
}

fn berth_reservation(params: Json) -> Result<Json, ToolError> {
    let id = str_param(&params, "berth").ok_or_else(|| ToolError::invalid("berth is required"))?;
    let nights = params
        .get("nights")
        .and_then(Json::as_u64)
        .filter(|n| *n > 0)
        .ok_or_else(|| ToolError::invalid("nights must be a positive integer"))?;
    let berth = BERTHS
        .iter()
        .find(|b| b.id == id)
        .ok_or_else(|| ToolError::not_found(format!("no berth {}", id)))?;
    if berth.occupied {
        return Err(ToolError::Failed(format!("berth {} is occupied", id)));
    }
    let nightly = berth.length_m * 4.25;
    Ok(json!({
        "berth": berth.id,
        "nights": nights,
        "nightly_rate": nightly,
        "total": nightly * nights as f64,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolLoader;

    #[test]
    fn vessel_search_finds_only_tracking() {
        let loader = ToolLoader::new(None, marina_plugins());
        let names: Vec<String> = loader
            .search_tools("vessel", None, None, 10)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["vessel_tracking"]);
        assert_eq!(loader.list_providers(), vec!["vessel", "port", "berth"]);
        assert_eq!(loader.total_tools(), 4);
    }

    #[test]
    fn every_declared_tool_resolves() {
        let loader = ToolLoader::new(None, marina_plugins());
        for provider in loader.list_providers() {
            for tool in loader.list_tools(&provider).unwrap() {
                assert!(loader.load_tool_function(&provider, &tool.name).is_ok(), "{}", tool.id());
            }
        }
    }

    #[test]
    fn reservation_validates_input() {
        assert!(berth_reservation(json!({"berth": "B-07", "nights": 2})).is_ok());
        assert!(matches!(
            berth_reservation(json!({"berth": "A-01", "nights": 1})),
            Err(ToolError::Failed(_))
        ));
        assert!(matches!(
            berth_reservation(json!({"berth": "B-07"})),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn availability_filters_by_length() {
        let open = berth_availability(json!({"min_length_m": 20})).unwrap();
        assert_eq!(open.as_array().map(Vec::len), Some(1));
    }
}
