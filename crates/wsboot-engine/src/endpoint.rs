//! Resolution of the agent websocket URL from a running workspace.

use url::Url;
use wsboot_core::{Machine, Workspace};

pub const WSAGENT_REF: &str = "wsagent";
pub const WSAGENT_PORT_KEY: &str = "4401/tcp";

/// How the agent endpoint is located in the workspace runtime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AgentEndpointStrategy {
    /// The dev machine's `wsagent` server, reached at `<server url>/ws`.
    #[default]
    WsAgentServer,
    /// A fixed port on the first machine, reached at its published address.
    FixedPort { port: u16 },
}

impl AgentEndpointStrategy {
    pub fn resolve(&self, workspace: &Workspace) -> Option<String> {
        match self {
            Self::WsAgentServer => {
                let dev = workspace.dev_machine()?;
                wsagent_url(dev)
            }
            Self::FixedPort { port } => {
                let machine = workspace.runtime.as_ref()?.machines.first()?;
                let address = machine.server(&format!("{port}/tcp"))?.address.as_deref()?;
                Url::parse(&format!("ws://{address}/")).ok().map(String::from)
            }
        }
    }
}

fn wsagent_url(machine: &Machine) -> Option<String> {
    let server = machine
        .server_by_ref(WSAGENT_REF)
        .or_else(|| machine.server(WSAGENT_PORT_KEY))?;
    let mut url = Url::parse(server.url.as_deref()?).ok()?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Some(with_ws_path(url)),
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    Some(with_ws_path(url))
}

fn with_ws_path(mut url: Url) -> String {
    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wsboot_core::{Server, WorkspaceRuntime, WorkspaceStatus};

    fn workspace_with(dev: Option<Machine>, machines: Vec<Machine>) -> Workspace {
        let mut ws = Workspace::new("w1", WorkspaceStatus::Running);
        ws.runtime = Some(WorkspaceRuntime {
            dev_machine: dev,
            machines,
        });
        ws
    }

    fn machine_with(key: &str, server: Server) -> Machine {
        let mut machine = Machine::default();
        machine.runtime.servers.insert(key.into(), server);
        machine
    }

    #[test]
    fn wsagent_http_url_becomes_ws() {
        let dev = machine_with(
            "4401/tcp",
            Server {
                reference: Some("wsagent".into()),
                url: Some("http://192.168.0.5:32768/api".into()),
                ..Default::default()
            },
        );
        let ws = workspace_with(Some(dev), vec![]);
        assert_eq!(
            AgentEndpointStrategy::WsAgentServer.resolve(&ws).as_deref(),
            Some("ws://192.168.0.5:32768/api/ws")
        );
    }

    #[test]
    fn wsagent_https_url_becomes_wss() {
        let dev = machine_with(
            "4401/tcp",
            Server {
                reference: None,
                url: Some("https://che.example.com/wsagent/api/".into()),
                ..Default::default()
            },
        );
        let ws = workspace_with(Some(dev), vec![]);
        assert_eq!(
            AgentEndpointStrategy::WsAgentServer.resolve(&ws).as_deref(),
            Some("wss://che.example.com/wsagent/api/ws")
        );
    }

    #[test]
    fn missing_runtime_resolves_to_none() {
        let ws = Workspace::new("w1", WorkspaceStatus::Running);
        assert_eq!(AgentEndpointStrategy::WsAgentServer.resolve(&ws), None);
        assert_eq!(AgentEndpointStrategy::FixedPort { port: 8080 }.resolve(&ws), None);
    }

    #[test]
    fn fixed_port_uses_first_machine_address() {
        let machine = machine_with(
            "8080/tcp",
            Server {
                address: Some("10.0.0.7:32801".into()),
                ..Default::default()
            },
        );
        let ws = workspace_with(None, vec![machine]);
        assert_eq!(
            AgentEndpointStrategy::FixedPort { port: 8080 }.resolve(&ws).as_deref(),
            Some("ws://10.0.0.7:32801/")
        );
        assert_eq!(AgentEndpointStrategy::FixedPort { port: 8888 }.resolve(&ws), None);
    }
}
