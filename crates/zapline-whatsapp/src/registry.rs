// SPDX-FileCopyrightText: 2026 Zapline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builds bridge drivers from the configured sidecar endpoints.

use std::sync::Arc;

use zapline_config::model::DriversConfig;
use zapline_core::{ConnectionId, Driver, DriverFactory, DriverKind, ZaplineError};

use crate::baileys::BaileysDriver;
use crate::webjs::WebJsDriver;

/// [`DriverFactory`] for the two supported engines.
#[derive(Debug, Clone)]
pub struct DriverRegistry {
    config: DriversConfig,
}

impl DriverRegistry {
    pub fn new(config: DriversConfig) -> Self {
        Self { config }
    }
}

impl DriverFactory for DriverRegistry {
    fn create(
        &self,
        kind: DriverKind,
        connection_id: &ConnectionId,
    ) -> Result<Arc<dyn Driver>, ZaplineError> {
        let endpoint = self.config.endpoint(kind);
        let driver: Arc<dyn Driver> = match kind {
            DriverKind::Baileys => Arc::new(BaileysDriver::new(connection_id.clone(), endpoint)?),
            DriverKind::WebJs => Arc::new(WebJsDriver::new(connection_id.clone(), endpoint)?),
        };
        Ok(driver)
    }
}
