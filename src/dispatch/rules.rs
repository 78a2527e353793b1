//! Ordered dispatch rule table.
//!
//! Rules are plain data evaluated top to bottom; the first rule whose
//! predicate holds and whose builder proposes a positive power wins. `hold`
//! always matches, so evaluation never comes up empty.
//!
//! `curtailment_absorb` sits after the price- and surplus-driven rules, so a
//! curtailment risk flag only changes ticks those rules would have held.

use crate::config::DispatchConfig;
use crate::model::DispatchAction;

use super::battery::Battery;

/// Inputs visible to every rule.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub price: f64,
    pub renewable_mw: f64,
    pub demand_mw: f64,
    pub curtailment_risk: bool,
    pub battery: &'a Battery,
    pub config: &'a DispatchConfig,
}

impl RuleContext<'_> {
    fn surplus_mw(&self) -> f64 {
        (self.renewable_mw - self.demand_mw).max(0.0)
    }

    fn deficit_mw(&self) -> f64 {
        (self.demand_mw - self.renewable_mw).max(0.0)
    }
}

/// What a rule wants the battery to do.
#[derive(Debug, Clone, PartialEq)]
pub struct Proposal {
    pub action: DispatchAction,
    pub power_mw: f64,
    pub reason: String,
}

/// One entry of the rule table.
pub struct DispatchRule {
    pub name: &'static str,
    pub predicate: fn(&RuleContext) -> bool,
    pub build: fn(&RuleContext) -> Proposal,
}

impl DispatchRule {
    /// Returns the rule's proposal if it applies to `ctx`.
    pub fn apply(&self, ctx: &RuleContext) -> Option<Proposal> {
        if !(self.predicate)(ctx) {
            return None;
        }
        let proposal = (self.build)(ctx);
        let usable = proposal.action == DispatchAction::Hold || proposal.power_mw > 0.0;
        usable.then_some(proposal)
    }
}

/// Outcome of evaluating the rule table.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub rule: &'static str,
    pub action: DispatchAction,
    pub power_mw: f64,
    pub reason: String,
}

/// Dispatch rules in priority order.
pub static RULES: &[DispatchRule] = &[
    DispatchRule {
        name: "surplus_charge",
        predicate: |c| {
            c.renewable_mw > c.demand_mw * c.config.surplus_factor
                && c.price < c.config.charge_price_max
                && c.battery.soc_percent < c.battery.soc_max
        },
        build: |c| Proposal {
            action: DispatchAction::Charge,
            power_mw: c
                .battery
                .max_charge_mw
                .min(c.surplus_mw())
                .min(c.battery.headroom_mw()),
            reason: format!(
                "renewable surplus {:.0} MW at {:.2} $/MWh",
                c.surplus_mw(),
                c.price
            ),
        },
    },
    DispatchRule {
        name: "peak_discharge",
        predicate: |c| {
            c.demand_mw > c.renewable_mw * c.config.deficit_factor
                && c.price > c.config.discharge_price_min
                && c.battery.soc_percent > c.battery.soc_min
        },
        build: |c| Proposal {
            action: DispatchAction::Discharge,
            power_mw: c
                .battery
                .max_discharge_mw
                .min(c.deficit_mw())
                .min(c.battery.available_mw(c.battery.soc_min)),
            reason: format!(
                "demand deficit {:.0} MW at peak price {:.2} $/MWh",
                c.deficit_mw(),
                c.price
            ),
        },
    },
    DispatchRule {
        name: "preemptive_charge",
        predicate: |c| {
            c.price < c.config.preemptive_price_max
                && c.battery.soc_percent < c.config.preemptive_soc_target
                && c.renewable_mw >= c.demand_mw
        },
        build: |c| Proposal {
            action: DispatchAction::Charge,
            power_mw: (c.battery.max_charge_mw * c.config.preemptive_rate_share)
                .min(c.surplus_mw())
                .min(c.battery.headroom_mw()),
            reason: format!(
                "pre-emptive charge toward {:.0}% at {:.2} $/MWh",
                c.config.preemptive_soc_target, c.price
            ),
        },
    },
    DispatchRule {
        name: "strategic_discharge",
        predicate: |c| {
            c.renewable_mw > c.demand_mw * c.config.strategic_factor
                && c.battery.soc_percent > c.config.strategic_soc_min
                && c.price > c.config.strategic_price_min
        },
        build: |c| {
            let floor = c.battery.soc_min.max(c.config.strategic_soc_floor);
            Proposal {
                action: DispatchAction::Discharge,
                power_mw: (c.battery.max_discharge_mw * c.config.strategic_rate_share)
                    .min(c.battery.available_mw(floor)),
                reason: format!(
                    "strategic discharge ahead of renewable surge, floor {floor:.0}%"
                ),
            }
        },
    },
    DispatchRule {
        name: "curtailment_absorb",
        predicate: |c| {
            c.curtailment_risk
                && c.price < c.config.preemptive_price_max
                && c.battery.soc_percent < c.battery.soc_max
        },
        build: |c| Proposal {
            action: DispatchAction::Charge,
            power_mw: c.battery.max_charge_mw.min(c.battery.headroom_mw()),
            reason: format!(
                "absorbing renewables at curtailment risk, {:.2} $/MWh",
                c.price
            ),
        },
    },
    DispatchRule {
        name: "hold",
        predicate: |_| true,
        build: |c| Proposal {
            action: DispatchAction::Hold,
            power_mw: 0.0,
            reason: format!(
                "no rule triggered at {:.2} $/MWh, SoC {:.1}%",
                c.price, c.battery.soc_percent
            ),
        },
    },
];

/// Evaluates [`RULES`] against `ctx`.
pub fn evaluate(ctx: &RuleContext) -> Decision {
    evaluate_with(RULES, ctx)
}

/// Evaluates an arbitrary rule table; falls back to holding if nothing matches.
pub fn evaluate_with(rules: &[DispatchRule], ctx: &RuleContext) -> Decision {
    rules
        .iter()
        .find_map(|rule| {
            rule.apply(ctx).map(|p| Decision {
                rule: rule.name,
                action: p.action,
                power_mw: p.power_mw,
                reason: p.reason,
            })
        })
        .unwrap_or_else(|| Decision {
            rule: "hold",
            action: DispatchAction::Hold,
            power_mw: 0.0,
            reason: "no applicable rule".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegionConfig;
    use crate::model::BatteryState;

    fn battery(soc: f64) -> Battery {
        let state = BatteryState {
            region: "ON".into(),
            soc_percent: soc,
            capacity_mwh: 250.0,
            power_rating_mw: 100.0,
            last_updated: None,
        };
        Battery::new(&state, &RegionConfig::sized(250.0, 100.0), 0.25)
    }

    fn decide(price: f64, renewable: f64, demand: f64, soc: f64) -> Decision {
        decide_at_risk(price, renewable, demand, soc, false)
    }

    fn decide_at_risk(
        price: f64,
        renewable: f64,
        demand: f64,
        soc: f64,
        risk: bool,
    ) -> Decision {
        let cfg = DispatchConfig::default();
        let b = battery(soc);
        evaluate(&RuleContext {
            price,
            renewable_mw: renewable,
            demand_mw: demand,
            curtailment_risk: risk,
            battery: &b,
            config: &cfg,
        })
    }

    #[test]
    fn surplus_at_low_price_charges() {
        let d = decide(20.0, 900.0, 800.0, 40.0);
        assert_eq!(d.rule, "surplus_charge");
        assert_eq!(d.action, DispatchAction::Charge);
        // min(charge rate 100, surplus 100, headroom 500)
        assert_eq!(d.power_mw, 100.0);
    }

    #[test]
    fn surplus_limited_by_headroom() {
        // 89% -> 1% of 250 MWh over 0.25 h = 10 MW
        let d = decide(20.0, 2000.0, 800.0, 89.0);
        assert_eq!(d.rule, "surplus_charge");
        assert!((d.power_mw - 10.0).abs() < 1e-9);
    }

    #[test]
    fn peak_price_discharges() {
        let d = decide(80.0, 500.0, 1400.0, 60.0);
        assert_eq!(d.rule, "peak_discharge");
        assert_eq!(d.action, DispatchAction::Discharge);
        assert_eq!(d.power_mw, 100.0);
    }

    #[test]
    fn peak_at_soc_min_holds() {
        let d = decide(80.0, 500.0, 1400.0, 20.0);
        assert_eq!(d.action, DispatchAction::Hold);
    }

    #[test]
    fn preemptive_charge_uses_half_rate() {
        // surplus 5% (< 10%), price between 30 and 40
        let d = decide(35.0, 1050.0, 1000.0, 45.0);
        assert_eq!(d.rule, "preemptive_charge");
        assert_eq!(d.power_mw, 50.0);
    }

    #[test]
    fn balanced_grid_falls_through_preemptive() {
        // renewable == demand: predicate holds but surplus is zero
        let d = decide(35.0, 1000.0, 1000.0, 45.0);
        assert_eq!(d.rule, "hold");
    }

    #[test]
    fn strategic_discharge_keeps_floor() {
        // strong surplus at a moderate price and high SoC
        let d = decide(45.0, 1500.0, 1000.0, 72.0);
        assert_eq!(d.rule, "strategic_discharge");
        assert_eq!(d.power_mw, 60.0);

        let d = decide(45.0, 1500.0, 1000.0, 41.0);
        assert_eq!(d.rule, "strategic_discharge");
        // (41 - 30)% of 250 MWh over 0.25 h = 110 MW, capped at 60
        assert_eq!(d.power_mw, 60.0);
    }

    #[test]
    fn curtailment_risk_charges_balanced_grid() {
        let d = decide_at_risk(35.0, 800.0, 800.0, 50.0, true);
        assert_eq!(d.rule, "curtailment_absorb");
        assert_eq!(d.action, DispatchAction::Charge);
        // min(charge rate 100, headroom 400)
        assert_eq!(d.power_mw, 100.0);

        assert_eq!(decide_at_risk(35.0, 800.0, 800.0, 50.0, false).rule, "hold");
    }

    #[test]
    fn curtailment_risk_defers_to_earlier_rules() {
        // peak pricing still discharges
        let d = decide_at_risk(80.0, 500.0, 1400.0, 60.0, true);
        assert_eq!(d.rule, "peak_discharge");
        // too expensive to absorb, and nothing to absorb into at soc_max
        assert_eq!(decide_at_risk(45.0, 800.0, 800.0, 50.0, true).rule, "hold");
        assert_eq!(decide_at_risk(35.0, 800.0, 800.0, 90.0, true).rule, "hold");
    }

    #[test]
    fn quiet_hour_holds() {
        let d = decide(50.0, 900.0, 1000.0, 50.0);
        assert_eq!(d.rule, "hold");
        assert_eq!(d.power_mw, 0.0);
    }

    #[test]
    fn empty_table_holds() {
        let cfg = DispatchConfig::default();
        let b = battery(50.0);
        let ctx = RuleContext {
            price: 10.0,
            renewable_mw: 2000.0,
            demand_mw: 1000.0,
            curtailment_risk: true,
            battery: &b,
            config: &cfg,
        };
        assert_eq!(evaluate_with(&[], &ctx).action, DispatchAction::Hold);
    }
}
