//! Placeholder for hosts without a control backend. Never constructed.

use std::sync::Arc;

use super::{ControlBackend, StartOutcome};
use crate::config::ServiceConfig;
use crate::descriptor::ServiceDescriptor;
use crate::error::{Result, ServiceError};

#[derive(Debug)]
pub enum UnsupportedBackend {}

impl UnsupportedBackend {
    pub fn new(_descriptor: Arc<ServiceDescriptor>, _config: &ServiceConfig) -> Result<Self> {
        Err(ServiceError::UnsupportedPlatform(format!(
            "no service backend for target OS '{}'",
            std::env::consts::OS
        )))
    }
}

impl ControlBackend for UnsupportedBackend {
    type Cleanup = ();

    fn start(&mut self) -> Result<StartOutcome> {
        match *self {}
    }

    fn stop(&mut self) -> Result<()> {
        match *self {}
    }

    fn install(&mut self) -> Result<()> {
        match *self {}
    }

    fn uninstall(&mut self) -> Result<()> {
        match *self {}
    }

    fn is_installed(&self) -> bool {
        match *self {}
    }

    fn is_running(&self) -> bool {
        match *self {}
    }

    fn exit_cleanup(&self) -> Self::Cleanup {
        match *self {}
    }
}
