use std::sync::OnceLock;
use std::time::Duration;

use url::Url;

use crate::error::{DeviceError, Result};
use crate::protocol::{ApiRequest, ApiResponse};
use crate::types::CapabilityMatrix;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const IRCC_SOAP_ACTION: &str = "\"urn:schemas-sony-com:service:IRCC:1#X_SendIRCC\"";
const IRCC_ENVELOPE: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
<s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\">\
<s:Body><u:X_SendIRCC xmlns:u=\"urn:schemas-sony-com:service:IRCC:1\">\
<IRCCCode></IRCCCode>\
</u:X_SendIRCC></s:Body></s:Envelope>";

/// HTTP client for a device's JSON control endpoints.
///
/// Sends versioned JSON requests to `{base_url}/{service}` and classifies
/// responses. The capability matrix is installed once during device
/// construction; after that every [`call`](ProtocolClient::call) is checked
/// against it before any network I/O.
pub struct ProtocolClient {
    http: reqwest::Client,
    base_url: Url,
    ircc_url: Option<Url>,
    capabilities: OnceLock<CapabilityMatrix>,
}

impl ProtocolClient {
    pub fn new(base_url: Url, ircc_url: Option<Url>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url,
            ircc_url,
            capabilities: OnceLock::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Install the capability matrix. Called exactly once, at the end of the
    /// capability-discovery step of device construction.
    pub fn install_capabilities(&self, matrix: CapabilityMatrix) {
        let _ = self.capabilities.set(matrix);
    }

    /// Send a request after validating its method/version pair against the
    /// device's capability matrix. An unsupported pair fails without a
    /// network call.
    pub async fn call(&self, service: &str, request: &ApiRequest) -> Result<ApiResponse> {
        if let Some(matrix) = self.capabilities.get() {
            if !matrix.supports(service, &request.method, &request.version) {
                return Err(DeviceError::UnsupportedVersion(format!(
                    "{} v{} on service {service} is not supported by the device at {}",
                    request.method,
                    request.version,
                    self.base_url.host_str().unwrap_or_default(),
                )));
            }
        }
        self.call_unchecked(service, request).await
    }

    /// Send a request without consulting the capability matrix. Used for the
    /// two construction-time calls that run before the matrix exists.
    pub async fn call_unchecked(&self, service: &str, request: &ApiRequest) -> Result<ApiResponse> {
        let url = self.service_url(service)?;
        tracing::debug!(
            "Request to device {}: {}",
            url,
            serde_json::to_string(request)?
        );

        let body = self
            .http
            .post(url.clone())
            .header("content-type", "application/json")
            .json(request)
            .send()
            .await?
            .text()
            .await?;
        tracing::debug!("Response from device {}: {}", url, body);

        let response: ApiResponse = serde_json::from_str(&body)?;
        response.into_result()
    }

    /// Endpoint URL for one API service under the base control URL.
    pub fn service_url(&self, service: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), service);
        url.set_path(&path);
        Ok(url)
    }

    /// WebSocket notification endpoint for one API service.
    pub fn notification_url(&self, service: &str) -> Result<Url> {
        let mut url = self.service_url(service)?;
        url.set_scheme("ws")
            .map_err(|_| DeviceError::InvalidResponse(format!("cannot derive ws URL from {url}")))?;
        Ok(url)
    }

    /// Send an infrared remote code over the legacy IRCC SOAP surface.
    ///
    /// This bypasses the JSON API entirely: a fixed XML envelope is POSTed to
    /// the secondary control URL with the base64 code substituted into the
    /// `IRCCCode` element. No capability negotiation applies.
    pub async fn send_ircc(&self, code: &str) -> Result<()> {
        let url = self
            .ircc_url
            .clone()
            .ok_or(DeviceError::RemoteControlUnavailable)?;
        let body = IRCC_ENVELOPE.replace(
            "<IRCCCode></IRCCCode>",
            &format!("<IRCCCode>{code}</IRCCCode>"),
        );
        tracing::debug!("Request to device {}: {}", url, body);

        let response = self
            .http
            .post(url.clone())
            .header("SOAPACTION", IRCC_SOAP_ACTION)
            .header("Content-Type", "text/xml; charset=\"utf-8\"")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        tracing::debug!("Response from device {}: HTTP {}", url, response.status());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServiceApiInfo;

    fn client() -> ProtocolClient {
        let base = Url::parse("http://192.168.1.50:10000/sony").unwrap();
        ProtocolClient::new(base, None).unwrap()
    }

    #[test]
    fn service_url_appends_service_to_base_path() {
        let client = client();
        assert_eq!(
            client.service_url("audio").unwrap().as_str(),
            "http://192.168.1.50:10000/sony/audio"
        );
    }

    #[test]
    fn notification_url_switches_to_ws_scheme() {
        let client = client();
        assert_eq!(
            client.notification_url("system").unwrap().as_str(),
            "ws://192.168.1.50:10000/sony/system"
        );
    }

    #[tokio::test]
    async fn unsupported_version_fails_without_network_call() {
        let client = client();
        let infos: Vec<ServiceApiInfo> = serde_json::from_value(serde_json::json!([
            {
                "service": "system",
                "apis": [{ "name": "getPowerStatus", "versions": [{ "version": "1.1" }] }]
            }
        ]))
        .unwrap();
        client.install_capabilities(CapabilityMatrix::from_api_info(&infos));

        // getSystemInformation v1.4 was never reported; the base URL points at
        // nothing routable, so reaching the network would not fail this way.
        let request = ApiRequest::system_information();
        match client.call("system", &request).await {
            Err(DeviceError::UnsupportedVersion(_)) => {}
            other => panic!("expected UnsupportedVersion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_ircc_url_is_reported() {
        let client = client();
        match client.send_ircc("AAAAAgAAADAAAAB8AQ==").await {
            Err(DeviceError::RemoteControlUnavailable) => {}
            other => panic!("expected RemoteControlUnavailable, got {other:?}"),
        }
    }
}
