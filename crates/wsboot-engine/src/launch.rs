//! IDE URL composition for a started workspace.

use rand::Rng;
use url::form_urlencoded::byte_serialize;
use url::Url;
use wsboot_core::workspace::IDE_URL_REL;
use wsboot_core::Workspace;

/// Env variable on the dev machine selecting the proxied remote IDE.
pub const RIDE_ENV: &str = "RIDE";
const RIDE_PROXY_SERVER: &str = "8080/tcp";

/// Pending IDE action and loading parameters for the next launch.
///
/// Both are consumed by [`IdeLaunch::resolve_url`].
#[derive(Clone, Debug)]
pub struct IdeLaunch {
    origin: Url,
    action: Option<String>,
    parameters: Vec<(String, String)>,
}

impl IdeLaunch {
    /// `origin` is the dashboard origin, used for the proxied IDE form.
    pub fn new(origin: Url) -> Self {
        Self {
            origin,
            action: None,
            parameters: Vec::new(),
        }
    }

    pub fn set_action(&mut self, action: impl Into<String>) {
        self.action = Some(action.into());
    }

    /// Set a loading parameter. Re-setting a name keeps its original position.
    pub fn set_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.parameters.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.parameters.push((name, value)),
        }
    }

    pub fn pending_action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    pub fn pending_parameters(&self) -> &[(String, String)] {
        &self.parameters
    }

    /// URL to embed for `workspace`, or `None` when it has no dev machine.
    pub fn resolve_url(&mut self, workspace: &Workspace) -> Option<String> {
        let uid = rand::thread_rng().gen_range(1..=1_000_000u32);
        self.compose(workspace, uid)
    }

    fn compose(&mut self, workspace: &Workspace, uid: u32) -> Option<String> {
        let mut query = format!("?uid={uid}");
        if let Some(action) = self.action.take() {
            query.push_str("&action=");
            query.extend(byte_serialize(action.as_bytes()));
        }
        for (name, value) in self.parameters.drain(..) {
            query.push('&');
            query.extend(byte_serialize(name.as_bytes()));
            query.push('=');
            query.extend(byte_serialize(value.as_bytes()));
        }

        let dev = workspace.dev_machine()?;
        if dev.runtime.env_variables.contains_key(RIDE_ENV) {
            return self.ride_url(workspace);
        }
        Some(format!("{}{query}", workspace.href_link(IDE_URL_REL)))
    }

    fn ride_url(&self, workspace: &Workspace) -> Option<String> {
        let address = workspace
            .runtime
            .as_ref()?
            .machines
            .first()?
            .server(RIDE_PROXY_SERVER)?
            .address
            .as_deref()?;
        let proxy_port = address.rsplit_once(':')?.1;
        let host = self.origin.host_str()?;
        match self.origin.scheme() {
            "https" => Some(format!("https://{host}/ssl_{proxy_port}/p8080/ride")),
            scheme => Some(format!("{scheme}://{host}:{proxy_port}/p8080/ride")),
        }
    }
}
