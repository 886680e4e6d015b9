//! Typed helpers for the built-in command vocabulary.

use log::{info, warn};
use serde::de::Error as _;

use super::correlator::CommandOutcome;
use super::driver::Session;
use super::phase::PhaseEvent;
use crate::error::SessionError;
use crate::manifest::{Capability, Manifest};
use crate::protocol::{Command, CommandData, ParamValue};

const EXIT_SERVICE_MODE: &str = "exit_service_mode";
const REBOOT: &str = "reboot";
const GET_STATUS: &str = "get_status";
const GET_MANIFEST: &str = "get_manifest";
const PROVISION: &str = "provision";
const CUSTOMER_RESET: &str = "customer_reset";
const FACTORY_RESET: &str = "factory_reset";

const UNIT_ID: &str = "unit_id";
const WIFI_SSID: &str = "wifi_ssid";
const WIFI_PASSWORD: &str = "wifi_password";
const CLOUD_URL: &str = "cloud_url";
const CLOUD_TOKEN: &str = "cloud_token";

/// What to write into a device during provisioning.
///
/// **Example**
/// ```
/// use servicemode::ProvisionRequest;
///
/// let request = ProvisionRequest::new("SV-HUB-000123")
///     .wifi("factory-floor", Some("hunter2"))
///     .field("region", "eu");
/// assert_eq!(request.unit_id, "SV-HUB-000123");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvisionRequest {
    pub unit_id: String,
    pub wifi_ssid: Option<String>,
    pub wifi_password: Option<String>,
    pub cloud_url: Option<String>,
    pub cloud_token: Option<String>,
    /// Any other provisioning field the device asks for.
    pub extra: CommandData,
}

impl ProvisionRequest {
    pub fn new<S: Into<String>>(unit_id: S) -> Self {
        ProvisionRequest {
            unit_id: unit_id.into(),
            ..Default::default()
        }
    }

    pub fn wifi<S: Into<String>>(mut self, ssid: S, password: Option<S>) -> Self {
        self.wifi_ssid = Some(ssid.into());
        self.wifi_password = password.map(Into::into);
        self
    }

    pub fn cloud<S: Into<String>>(mut self, url: S, token: Option<S>) -> Self {
        self.cloud_url = Some(url.into());
        self.cloud_token = token.map(Into::into);
        self
    }

    pub fn field<K: Into<String>, V: Into<ParamValue>>(mut self, key: K, value: V) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// The `provision` command payload.
    pub fn to_data(&self) -> CommandData {
        let mut data = self.extra.clone();
        data.insert(UNIT_ID.into(), self.unit_id.clone().into());
        let optional = [
            (WIFI_SSID, &self.wifi_ssid),
            (WIFI_PASSWORD, &self.wifi_password),
            (CLOUD_URL, &self.cloud_url),
            (CLOUD_TOKEN, &self.cloud_token),
        ];
        for (key, value) in optional.iter() {
            if let Some(value) = value {
                data.insert(key.to_string(), value.clone().into());
            }
        }
        data
    }

    /// Check the request on its own and, when known, against the device
    /// manifest.
    pub fn validate(&self, manifest: Option<&Manifest>) -> Result<(), SessionError> {
        if self.unit_id.trim().is_empty() {
            return Err(SessionError::MissingParameter {
                command: PROVISION.into(),
                param: UNIT_ID.into(),
            });
        }
        let manifest = match manifest {
            Some(manifest) => manifest,
            None => return Ok(()),
        };

        let data = self.to_data();
        if let Some(missing) = manifest
            .required_fields()
            .iter()
            .find(|field| !data.contains_key(field.as_str()))
        {
            return Err(SessionError::MissingParameter {
                command: PROVISION.into(),
                param: missing.clone(),
            });
        }

        let gated = [
            (WIFI_SSID, self.wifi_ssid.is_some(), Capability::Wifi),
            (WIFI_PASSWORD, self.wifi_password.is_some(), Capability::Wifi),
            (CLOUD_URL, self.cloud_url.is_some(), Capability::Cloud),
            (CLOUD_TOKEN, self.cloud_token.is_some(), Capability::Cloud),
        ];
        for (field, present, capability) in gated.iter() {
            if *present && !manifest.has(*capability) {
                return Err(SessionError::UnsupportedCapability {
                    field: field.to_string(),
                    capability: capability.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Session {
    /// Ask the device for its status and refresh the cached device info.
    pub fn get_status(&mut self) -> Result<CommandOutcome, SessionError> {
        let outcome = self.send_command(Command::new(GET_STATUS))?;
        if let CommandOutcome::Success(response) = &outcome {
            if let Some(data) = &response.data {
                self.state.device_info_mut().merge(data);
            }
        }
        Ok(outcome)
    }

    /// Fetch the device manifest. A successful fetch replaces the cached
    /// manifest as a whole.
    pub fn get_manifest(&mut self) -> Result<CommandOutcome, SessionError> {
        let outcome = self.send_command(Command::new(GET_MANIFEST))?;
        if let CommandOutcome::Success(response) = &outcome {
            let data = response.data.clone().ok_or_else(|| {
                SessionError::Manifest(serde_json::Error::custom(
                    "manifest response carries no data",
                ))
            })?;
            let manifest = Manifest::from_value(data).map_err(SessionError::Manifest)?;
            info!(
                "Manifest {} for {} ({} tests, {} custom commands)",
                manifest.manifest_version,
                manifest.device_type,
                manifest.supported_tests.len(),
                manifest.custom_commands.len()
            );
            self.state.manifest = Some(manifest);
        }
        Ok(outcome)
    }

    /// Write the provisioning data into the device.
    pub fn provision(
        &mut self,
        request: &ProvisionRequest,
    ) -> Result<CommandOutcome, SessionError> {
        self.ensure_ready()?;
        request.validate(self.state.manifest.as_ref())?;
        let outcome = self.send_command(Command::with_data(PROVISION, request.to_data()))?;
        if outcome.is_success() {
            info!("Provisioned as {}", request.unit_id);
            self.state.device_info_mut().unit_id = Some(request.unit_id.clone());
        }
        Ok(outcome)
    }

    /// Run a command the device declared in its manifest, after checking the
    /// parameters against the declaration.
    pub fn run_custom(
        &mut self,
        name: &str,
        params: CommandData,
    ) -> Result<CommandOutcome, SessionError> {
        self.ensure_ready()?;
        let manifest = self.state.manifest.as_ref().ok_or(SessionError::NoManifest)?;
        let definition = manifest
            .command(name)
            .ok_or_else(|| SessionError::UnknownCommand(name.to_owned()))?;
        definition.validate(&params)?;
        self.send_command(Command::with_data(name, params))
    }

    /// Leave service mode. The device goes back to normal operation.
    pub fn exit_service_mode(&mut self) -> Result<CommandOutcome, SessionError> {
        self.leaving_service_mode(EXIT_SERVICE_MODE)
    }

    /// Reboot the device. Service mode has to be entered again afterwards.
    pub fn reboot(&mut self) -> Result<CommandOutcome, SessionError> {
        self.leaving_service_mode(REBOOT)
    }

    pub fn customer_reset(&mut self) -> Result<CommandOutcome, SessionError> {
        self.send_command(Command::new(CUSTOMER_RESET))
    }

    pub fn factory_reset(&mut self) -> Result<CommandOutcome, SessionError> {
        let outcome = self.send_command(Command::new(FACTORY_RESET))?;
        if outcome.is_success() {
            warn!("Device was reset to factory defaults");
        }
        Ok(outcome)
    }

    fn leaving_service_mode(&mut self, cmd: &str) -> Result<CommandOutcome, SessionError> {
        let outcome = self.send_command(Command::new(cmd))?;
        if outcome.is_success() && self.phase().can_send_commands() {
            self.transition(PhaseEvent::ServiceModeLeft)?;
        }
        Ok(outcome)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest(capabilities: serde_json::Value) -> Manifest {
        Manifest::from_value(json!({
            "capabilities": capabilities,
            "provisioning": {"required_fields": ["unit_id", "region"]}
        }))
        .unwrap()
    }

    #[test]
    fn payload() {
        let data = ProvisionRequest::new("SV-HUB-000123")
            .wifi("lab", None)
            .field("region", "eu")
            .to_data();
        assert_eq!(data[UNIT_ID], ParamValue::from("SV-HUB-000123"));
        assert_eq!(data[WIFI_SSID], ParamValue::from("lab"));
        assert_eq!(data["region"], ParamValue::from("eu"));
        assert!(!data.contains_key(WIFI_PASSWORD));
        assert!(!data.contains_key(CLOUD_URL));
    }

    #[test]
    fn unit_id_is_required() {
        let err = ProvisionRequest::new("  ").validate(None).unwrap_err();
        assert!(matches!(
            err,
            SessionError::MissingParameter { ref param, .. } if param == UNIT_ID
        ));
        assert!(ProvisionRequest::new("SV-1").validate(None).is_ok());
    }

    #[test]
    fn manifest_required_fields() {
        let manifest = manifest(json!({}));
        let err = ProvisionRequest::new("SV-1")
            .validate(Some(&manifest))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::MissingParameter { ref param, .. } if param == "region"
        ));
        assert!(ProvisionRequest::new("SV-1")
            .field("region", "us")
            .validate(Some(&manifest))
            .is_ok());
    }

    #[test]
    fn capability_gating() {
        let no_wifi = manifest(json!({"cloud": true}));
        let err = ProvisionRequest::new("SV-1")
            .field("region", "us")
            .wifi("lab", Some("pw"))
            .validate(Some(&no_wifi))
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::UnsupportedCapability { ref capability, .. } if capability == "wifi"
        ));

        assert!(ProvisionRequest::new("SV-1")
            .field("region", "us")
            .cloud("https://api.example.com", None)
            .validate(Some(&no_wifi))
            .is_ok());
    }
}
