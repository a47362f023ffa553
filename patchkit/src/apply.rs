//! Payload application entry points.
//!
//! [`apply_payload`] is the one-shot path: validate, mask, apply, unmask.
//! [`PatchEngine`] adds the long-lived pieces (configuration and the SPA
//! controller) for hosts that keep a page open across navigations.

use serde::Serialize;
use tracing::{info, warn};

use crate::core::ops::Payload;
use crate::core::patch::apply_operations;
use crate::core::types::ApplyResult;
use crate::io::config::EngineConfig;
use crate::runtime::mask::AntiFlickerMask;
use crate::runtime::page::Page;
use crate::runtime::spa::{SpaController, SpaState};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Keep reapplying the payload after client-side navigation.
    pub spa: bool,
    /// Apply without hiding the masked selectors first.
    pub skip_mask: bool,
    /// Overrides the configured mask timeout.
    pub mask_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub success: bool,
    /// Payload-level rejection messages or per-operation failures.
    pub errors: Vec<String>,
    /// Absent when the payload was rejected before any mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ApplyResult>,
}

impl ApplyReport {
    fn rejected(errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            result: None,
        }
    }

    fn from_result(result: ApplyResult) -> Self {
        Self {
            success: result.success,
            errors: result.errors().map(ToString::to_string).collect(),
            result: Some(result),
        }
    }
}

/// Applies `payload` once with default configuration. With `spa` set, the
/// returned controller keeps the payload applied across navigations.
pub fn apply_payload(
    page: &mut Page,
    payload: &Payload,
    options: &ApplyOptions,
) -> (ApplyReport, Option<SpaController>) {
    let mut engine = PatchEngine::new(EngineConfig::default());
    let report = engine.apply_payload(page, payload, options);
    let controller = (engine.spa.state() == SpaState::Enabled).then_some(engine.spa);
    (report, controller)
}

pub struct PatchEngine {
    config: EngineConfig,
    spa: SpaController,
}

impl PatchEngine {
    pub fn new(config: EngineConfig) -> Self {
        let mut spa = SpaController::new(config.spa.clone());
        spa.set_mask_timeout(Some(config.mask.timeout_ms));
        Self { config, spa }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn spa(&self) -> &SpaController {
        &self.spa
    }

    pub fn apply_payload(
        &mut self,
        page: &mut Page,
        payload: &Payload,
        options: &ApplyOptions,
    ) -> ApplyReport {
        if let Err(err) = payload.validate() {
            warn!(error = %err, "payload rejected");
            return ApplyReport::rejected(vec![err.to_string()]);
        }

        let mask = (!options.skip_mask && !payload.mask_selectors().is_empty()).then(|| {
            AntiFlickerMask::engage(
                page,
                payload.mask_selectors(),
                Some(options.mask_timeout_ms.unwrap_or(self.config.mask.timeout_ms)),
            )
        });

        let result = apply_operations(page.document_mut(), &payload.ops);

        if let Some(mask) = mask {
            mask.release(page);
        }
        page.reclaim_detached();
        info!(
            ops = payload.ops.len(),
            applied = result.applied_count(),
            changed = result.changed_count(),
            success = result.success,
            "payload applied"
        );

        if options.spa {
            let mut payload = payload.clone();
            if options.skip_mask {
                payload.mask = None;
            }
            if let Some(timeout_ms) = options.mask_timeout_ms {
                self.spa.set_mask_timeout(Some(timeout_ms));
            }
            self.enable_spa_mode(page, payload);
        }
        ApplyReport::from_result(result)
    }

    pub fn enable_spa_mode(&mut self, page: &mut Page, payload: Payload) {
        self.spa.enable(page, payload);
    }

    pub fn disable_spa_mode(&mut self, page: &mut Page) {
        self.spa.disable(page);
    }
}
