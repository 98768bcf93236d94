///! NetFlow, sFlow and IPFIX export configuration per bridge
///!
///! Each protocol hangs off its own column of the bridge record and is
///! configured in one `ovs-vsctl` transaction that creates the export row
///! and points the bridge at it. Disabling clears the column; the switch
///! garbage-collects the orphaned row.

use switchyard_common::{ConfigureFlowExportRequest, FlowExportConfig, FlowProtocol, Result};
use tracing::info;

use super::parse;
use crate::remote::RemoteShell;

pub struct FlowExportService<'a> {
    shell: &'a dyn RemoteShell,
}

impl<'a> FlowExportService<'a> {
    pub fn new(shell: &'a dyn RemoteShell) -> Self {
        Self { shell }
    }

    /// Configure flow export for a bridge, replacing any existing
    /// configuration of the same protocol.
    pub async fn configure(
        &self,
        protocol: FlowProtocol,
        bridge: &str,
        request: &ConfigureFlowExportRequest,
    ) -> Result<()> {
        let targets = request
            .targets
            .iter()
            .map(|t| format!("\\\"{}\\\"", t))
            .collect::<Vec<_>>()
            .join(",");

        let mut params = vec![format!("targets=[{}]", targets)];
        let mut push = |key: &str, value: Option<u32>| {
            if let Some(value) = value {
                params.push(format!("{}={}", key, value));
            }
        };

        let (column, table) = match protocol {
            FlowProtocol::Netflow => {
                push("active_timeout", request.active_timeout);
                push("engine_id", request.engine_id);
                push("engine_type", request.engine_type);
                ("netflow", "NetFlow")
            }
            FlowProtocol::Sflow => {
                push("header", request.header);
                push("sampling", request.sampling);
                push("polling", request.polling);
                ("sflow", "sFlow")
            }
            FlowProtocol::Ipfix => {
                push("obs_domain_id", request.obs_domain_id);
                push("obs_point_id", request.obs_point_id);
                push("cache_active_timeout", request.cache_active_timeout);
                push("cache_max_flows", request.cache_max_flows);
                ("ipfix", "IPFIX")
            }
        };

        let command = format!(
            "ovs-vsctl -- set Bridge {} {}=@fe -- --id=@fe create {} {}",
            bridge,
            column,
            table,
            params.join(" ")
        );
        self.shell.execute_checked(&command).await?;

        info!(bridge, protocol = %protocol, "flow export configured");
        Ok(())
    }

    /// Read back the current flow export configuration, or `None` when the
    /// protocol is not configured on the bridge.
    pub async fn get(
        &self,
        protocol: FlowProtocol,
        bridge: &str,
    ) -> Result<Option<FlowExportConfig>> {
        let column = Self::column(protocol);

        let output = self
            .shell
            .execute(&format!("ovs-vsctl get Bridge {} {}", bridge, column))
            .await?;
        let row_uuid = output.stdout.trim().to_string();
        if output.exit_code != 0 || row_uuid.is_empty() || row_uuid == "[]" {
            return Ok(None);
        }

        let table = Self::table(protocol);
        let output = self
            .shell
            .execute(&format!("ovs-vsctl list {} {}", table, row_uuid))
            .await?;
        if output.exit_code != 0 {
            return Ok(None);
        }
        let record = parse::parse_record_dump(&output.stdout);

        let num = |key: &str| -> Option<u32> {
            record
                .get(key)
                .and_then(|v| parse::optional_scalar(v))
                .and_then(|v| v.parse().ok())
        };

        Ok(Some(FlowExportConfig {
            protocol,
            bridge: bridge.to_string(),
            targets: record
                .get("targets")
                .map(|v| parse::parse_array_literal(v))
                .unwrap_or_default(),
            active_timeout: num("active_timeout"),
            engine_id: num("engine_id"),
            engine_type: num("engine_type"),
            header: num("header"),
            sampling: num("sampling"),
            polling: num("polling"),
            obs_domain_id: num("obs_domain_id"),
            obs_point_id: num("obs_point_id"),
            cache_active_timeout: num("cache_active_timeout"),
            cache_max_flows: num("cache_max_flows"),
        }))
    }

    /// Disable flow export of the given protocol for a bridge.
    pub async fn disable(&self, protocol: FlowProtocol, bridge: &str) -> Result<()> {
        self.shell
            .execute_checked(&format!(
                "ovs-vsctl clear Bridge {} {}",
                bridge,
                Self::column(protocol)
            ))
            .await?;
        info!(bridge, protocol = %protocol, "flow export disabled");
        Ok(())
    }

    fn column(protocol: FlowProtocol) -> &'static str {
        match protocol {
            FlowProtocol::Netflow => "netflow",
            FlowProtocol::Sflow => "sflow",
            FlowProtocol::Ipfix => "ipfix",
        }
    }

    fn table(protocol: FlowProtocol) -> &'static str {
        match protocol {
            FlowProtocol::Netflow => "NetFlow",
            FlowProtocol::Sflow => "sFlow",
            FlowProtocol::Ipfix => "IPFIX",
        }
    }
}
