//! Request parsing and action validation.
//!
//! Everything that can reject a request happens here, before any region
//! is looked up or any feature is copied.

use std::str::FromStr;

use geo::{Area, Polygon, Validation};
use healthy_city_simulation_models::{
    ActionGeometry, ActionKind, ActionRequest, AreaAction, FacilityAction, InterventionAction,
};

use crate::SimulationError;
use crate::catalog::ActionCatalog;

/// Converts a wire request into a typed action.
///
/// # Errors
///
/// Returns [`SimulationError::InvalidAction`] for an unknown kind, a
/// missing or unsupported geometry, or a polygon given to a facility
/// action.
pub fn parse_request(request: &ActionRequest) -> Result<InterventionAction, SimulationError> {
    let kind = ActionKind::from_str(&request.kind)
        .map_err(|_| SimulationError::invalid(format!("unknown action kind {:?}", request.kind)))?;

    let geometry = request
        .geometry
        .clone()
        .ok_or_else(|| SimulationError::invalid(format!("{kind} requires a geometry")))?;
    let geometry: geo::Geometry<f64> = geometry
        .try_into()
        .map_err(|e| SimulationError::invalid(format!("unreadable geometry: {e}")))?;

    let geometry = match geometry {
        geo::Geometry::Point(point) => ActionGeometry::Point(point),
        geo::Geometry::Polygon(polygon) => ActionGeometry::Polygon(polygon),
        geo::Geometry::MultiPolygon(mut mp) if mp.0.len() == 1 => {
            ActionGeometry::Polygon(mp.0.remove(0))
        }
        other => {
            return Err(SimulationError::invalid(format!(
                "unsupported geometry type {}",
                geometry_name(&other)
            )));
        }
    };

    if kind == ActionKind::AddClinic {
        let ActionGeometry::Point(location) = geometry else {
            return Err(SimulationError::invalid("add_clinic requires a point geometry"));
        };
        return Ok(InterventionAction::AddClinic(FacilityAction {
            location,
            capacity: request.capacity,
        }));
    }

    if request.capacity.is_some() {
        log::warn!("Ignoring capacity on {kind} action");
    }

    let payload = AreaAction {
        geometry,
        intensity: request.intensity.unwrap_or(1.0),
    };
    InterventionAction::area(kind, payload)
        .ok_or_else(|| SimulationError::invalid(format!("{kind} does not take an area payload")))
}

/// Checks an action is fully defined and well-formed.
///
/// # Errors
///
/// Returns [`SimulationError::InvalidAction`] for a kind with no recipe,
/// an empty or non-finite geometry, a self-intersecting polygon, or a
/// non-positive intensity or capacity.
pub fn validate_action(
    action: &InterventionAction,
    catalog: &ActionCatalog,
) -> Result<(), SimulationError> {
    let kind = action.kind();
    let recipe = catalog
        .recipe(kind)
        .ok_or_else(|| SimulationError::invalid(format!("no recipe configured for {kind}")))?;

    match action {
        InterventionAction::AddClinic(facility) => {
            check_point(facility.location)?;
            if let Some(capacity) = facility.capacity
                && !(capacity.is_finite() && capacity > 0.0)
            {
                return Err(SimulationError::invalid(format!(
                    "capacity {capacity} must be positive"
                )));
            }
        }
        InterventionAction::AddPark(area)
        | InterventionAction::AddTrees(area)
        | InterventionAction::CoolRoof(area)
        | InterventionAction::EvZone(area)
        | InterventionAction::GreenInfrastructure(area) => {
            if !(area.intensity.is_finite() && area.intensity > 0.0) {
                return Err(SimulationError::invalid(format!(
                    "intensity {} must be positive",
                    area.intensity
                )));
            }
            match &area.geometry {
                ActionGeometry::Point(point) => check_point(*point)?,
                ActionGeometry::Polygon(polygon) => check_polygon(polygon)?,
            }
        }
    }

    let given = action.geometry().geometry_type();
    if given != recipe.geometry {
        log::warn!(
            "{kind} is normally a {} action, got a {given}",
            recipe.geometry
        );
    }

    Ok(())
}

fn check_point(point: geo::Point<f64>) -> Result<(), SimulationError> {
    if point.x().is_finite() && point.y().is_finite() {
        Ok(())
    } else {
        Err(SimulationError::invalid("point coordinates must be finite"))
    }
}

fn check_polygon(polygon: &Polygon<f64>) -> Result<(), SimulationError> {
    // Closed ring of at least three distinct vertices.
    if polygon.exterior().0.len() < 4 {
        return Err(SimulationError::invalid("polygon is empty"));
    }
    if polygon
        .exterior()
        .coords()
        .chain(polygon.interiors().iter().flat_map(|ring| ring.coords()))
        .any(|c| !(c.x.is_finite() && c.y.is_finite()))
    {
        return Err(SimulationError::invalid("polygon coordinates must be finite"));
    }
    if !polygon.is_valid() {
        return Err(SimulationError::invalid(
            "polygon is self-intersecting or malformed",
        ));
    }
    if polygon.unsigned_area() <= 0.0 {
        return Err(SimulationError::invalid("polygon has zero area"));
    }
    Ok(())
}

const fn geometry_name(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}

#[cfg(test)]
mod tests {
    use geo::{point, polygon};

    use super::*;

    fn request(json: &str) -> ActionRequest {
        serde_json::from_str(json).unwrap()
    }

    fn catalog() -> ActionCatalog {
        ActionCatalog::embedded().unwrap()
    }

    #[test]
    fn unknown_kind_is_rejected_with_reason() {
        let err = parse_request(&request(
            r#"{ "kind": "build_volcano", "geometry": { "type": "Point", "coordinates": [0, 0] } }"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("build_volcano"), "{err}");
    }

    #[test]
    fn missing_geometry_is_rejected() {
        let err = parse_request(&request(r#"{ "kind": "add_park" }"#)).unwrap_err();
        assert!(matches!(err, SimulationError::InvalidAction { .. }));
    }

    #[test]
    fn line_geometry_is_unsupported() {
        let err = parse_request(&request(
            r#"{ "kind": "add_trees", "geometry": { "type": "LineString", "coordinates": [[0, 0], [1, 1]] } }"#,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("LineString"), "{err}");
    }

    #[test]
    fn clinic_needs_a_point() {
        let err = parse_request(&request(
            r#"{ "kind": "add_clinic", "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,0]]] } }"#,
        ))
        .unwrap_err();
        assert!(matches!(err, SimulationError::InvalidAction { .. }));

        let action = parse_request(&request(
            r#"{ "kind": "add_clinic", "geometry": { "type": "Point", "coordinates": [3, 4] }, "capacity": 250 }"#,
        ))
        .unwrap();
        assert_eq!(
            action,
            InterventionAction::AddClinic(FacilityAction {
                location: point!(x: 3.0, y: 4.0),
                capacity: Some(250.0),
            })
        );
    }

    #[test]
    fn intensity_defaults_to_one() {
        let action = parse_request(&request(
            r#"{ "kind": "cool_roof", "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]] } }"#,
        ))
        .unwrap();
        let InterventionAction::CoolRoof(area) = action else {
            panic!("expected cool_roof");
        };
        assert!((area.intensity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn self_intersecting_polygon_is_rejected() {
        let bowtie = polygon![(x: 0.0, y: 0.0), (x: 2.0, y: 2.0), (x: 2.0, y: 0.0), (x: 0.0, y: 2.0)];
        let action = InterventionAction::AddPark(AreaAction {
            geometry: ActionGeometry::Polygon(bowtie),
            intensity: 1.0,
        });
        let err = validate_action(&action, &catalog()).unwrap_err();
        assert!(err.to_string().contains("self-intersecting"), "{err}");
    }

    #[test]
    fn degenerate_polygon_is_rejected() {
        let sliver = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 2.0, y: 0.0)];
        let action = InterventionAction::EvZone(AreaAction {
            geometry: ActionGeometry::Polygon(sliver),
            intensity: 1.0,
        });
        assert!(validate_action(&action, &catalog()).is_err());
    }

    #[test]
    fn non_positive_intensity_and_capacity_are_rejected() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let park = InterventionAction::AddPark(AreaAction {
            geometry: ActionGeometry::Polygon(square),
            intensity: 0.0,
        });
        assert!(validate_action(&park, &catalog()).is_err());

        let clinic = InterventionAction::AddClinic(FacilityAction {
            location: point!(x: 0.0, y: 0.0),
            capacity: Some(-5.0),
        });
        assert!(validate_action(&clinic, &catalog()).is_err());
    }

    #[test]
    fn well_formed_action_passes() {
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let park = InterventionAction::AddPark(AreaAction {
            geometry: ActionGeometry::Polygon(square),
            intensity: 1.5,
        });
        assert!(validate_action(&park, &catalog()).is_ok());
    }
}
