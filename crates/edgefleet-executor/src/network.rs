use async_trait::async_trait;
use edgefleet_registry::Node;

use crate::http::HttpClient;
use crate::request::{HttpProbe, Identity, RemoteCommand};
use crate::ssh::{SshClient, SshOptions};
use crate::transport::{CommandOutput, HttpResponse, Transport, TransportError};

/// The production transport: `ssh` for commands, `reqwest` for probes.
#[derive(Debug, Clone)]
pub struct NetworkTransport {
  ssh: SshClient,
  http: HttpClient,
}

impl NetworkTransport {
  pub fn new(options: SshOptions) -> Result<Self, TransportError> {
    let http = HttpClient::new(options.connect_timeout)?;
    Ok(Self {
      ssh: SshClient::new(options),
      http,
    })
  }
}

#[async_trait]
impl Transport for NetworkTransport {
  async fn exec(
    &self,
    node: &Node,
    identity: Option<&Identity>,
    command: &RemoteCommand,
  ) -> Result<CommandOutput, TransportError> {
    self.ssh.exec(node, identity, command).await
  }

  async fn http(&self, node: &Node, probe: &HttpProbe) -> Result<HttpResponse, TransportError> {
    self.http.send(node, probe).await
  }
}
