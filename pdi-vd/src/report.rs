//! Request-level intelligence report

use crate::assessment::OmittedParameter;
use crate::types::{Decision, Route, ScoreEntry, Verdict, WeightedAssessment};
use crate::verification::VerificationSummary;
use crate::workflow::CategoryOutcome;
use pdi_common::events::CategoryStatus;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Phase 2 output for one route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteReport {
    pub route: Route,
    pub scores: Vec<ScoreEntry>,
    pub omitted: Vec<OmittedParameter>,
    pub assessment: WeightedAssessment,
    pub verdict: Verdict,
}

/// Everything the pipeline produced for one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceReport {
    pub request_id: Uuid,
    pub drug_name: String,
    /// One entry per requested category, ordered by category id
    pub categories: Vec<CategoryOutcome>,
    pub routes: Vec<RouteReport>,
    pub verification: VerificationSummary,
    pub recommended_route: Option<Route>,
}

impl IntelligenceReport {
    pub fn category(&self, id: &str) -> Option<&CategoryOutcome> {
        self.categories.iter().find(|c| c.category == id)
    }

    pub fn route(&self, route: Route) -> Option<&RouteReport> {
        self.routes.iter().find(|r| r.route == route)
    }

    pub fn count(&self, status: CategoryStatus) -> usize {
        self.categories.iter().filter(|c| c.status == status).count()
    }
}

/// Best route: GO over CONDITIONAL, then higher percentage, then route order
///
/// `None` when every route is NO_GO.
pub fn recommend_route(routes: &[RouteReport]) -> Option<Route> {
    let rank = |d: Decision| match d {
        Decision::Go => 2,
        Decision::Conditional => 1,
        Decision::NoGo => 0,
    };

    routes
        .iter()
        .filter(|r| r.verdict.decision != Decision::NoGo)
        .max_by(|a, b| {
            rank(a.verdict.decision)
                .cmp(&rank(b.verdict.decision))
                .then(a.verdict.percentage.total_cmp(&b.verdict.percentage))
                .then(b.route.cmp(&a.route))
        })
        .map(|r| r.route)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SensitivityReport;
    use std::collections::BTreeMap;

    fn route_report(route: Route, decision: Decision, percentage: f64) -> RouteReport {
        RouteReport {
            route,
            scores: vec![],
            omitted: vec![],
            assessment: WeightedAssessment {
                route,
                weighted_total: 0.0,
                max_possible: 0.0,
                percentage,
                category_weights: BTreeMap::new(),
                contributions: vec![],
                sensitivity: SensitivityReport {
                    deltas: vec![],
                    most_influential: None,
                },
            },
            verdict: Verdict {
                route,
                decision,
                confidence: 0.8,
                percentage,
                supporting_reasons: vec![],
                key_risks: vec![],
                rationale: String::new(),
            },
        }
    }

    #[test]
    fn test_go_beats_higher_conditional() {
        let routes = vec![
            route_report(Route::Transdermal, Decision::Go, 71.0),
            route_report(Route::Transmucosal, Decision::Conditional, 69.0),
        ];
        assert_eq!(recommend_route(&routes), Some(Route::Transdermal));
    }

    #[test]
    fn test_percentage_breaks_decision_tie() {
        let routes = vec![
            route_report(Route::Transdermal, Decision::Conditional, 55.0),
            route_report(Route::Transmucosal, Decision::Conditional, 65.0),
        ];
        assert_eq!(recommend_route(&routes), Some(Route::Transmucosal));
    }

    #[test]
    fn test_equal_routes_prefer_first() {
        let routes = vec![
            route_report(Route::Transdermal, Decision::Go, 80.0),
            route_report(Route::Transmucosal, Decision::Go, 80.0),
        ];
        assert_eq!(recommend_route(&routes), Some(Route::Transdermal));
    }

    #[test]
    fn test_all_no_go_recommends_nothing() {
        let routes = vec![
            route_report(Route::Transdermal, Decision::NoGo, 90.0),
            route_report(Route::Transmucosal, Decision::NoGo, 20.0),
        ];
        assert_eq!(recommend_route(&routes), None);
    }
}
