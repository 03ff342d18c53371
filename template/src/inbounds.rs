use std::net::{IpAddr, Ipv4Addr};

use anyhow::{Context, Result};
use config::inbound::{
    DomainStrategy, HttpProxyOptions, Inbound, InboundOptions, MixedInboundOptions,
    TunInboundOptions, TunPlatformOptions,
};
use config::merge::{merge_into, ListMerge};
use config::template::DEFAULT_MIXED_PORT;
use config::{BoxOptions, Metadata, Platform};
use ipnet::IpNet;

use crate::{version, Template};

const TUN_INET4_ADDRESS: &str = "172.19.0.1/30";
const TUN_INET6_ADDRESS: &str = "fdfe:dcba:9876::1/126";
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

impl Template {
    pub(crate) fn render_inbounds(&self, metadata: &Metadata, options: &mut BoxOptions) -> Result<()> {
        let template = &self.options;
        options.inbounds = template.inbounds.clone();

        let domain_strategy = if template.remote_resolve {
            None
        } else {
            Some(template.domain_strategy.unwrap_or(DomainStrategy::PreferIpv4))
        };
        let disable_rule_action = self.disable_rule_action(metadata);
        let auto_redirect = template.auto_redirect
            && !metadata.platform.is_apple()
            && !metadata.is_before(&version::AUTO_REDIRECT);
        let disable_tun = template.disable_tun && !metadata.platform.tun_only();

        if !disable_tun {
            options.route_mut().auto_detect_interface = true;
            let mut address: Vec<IpNet> = vec![TUN_INET4_ADDRESS.parse()?];
            if !template.disable_ipv6() {
                address.push(TUN_INET6_ADDRESS.parse()?);
            }
            let mut tun = TunInboundOptions {
                address,
                auto_route: true,
                ..Default::default()
            };
            if auto_redirect {
                tun.auto_redirect = true;
                if !template.disable_traffic_bypass && metadata.platform == Platform::Unknown {
                    tun.route_exclude_address_set = vec!["geoip-cn".to_string()];
                }
            }
            if metadata.platform == Platform::Unknown {
                tun.strict_route = true;
            }
            if disable_rule_action {
                tun.sniff = !template.disable_sniff;
                if template.enable_fakeip {
                    tun.domain_strategy = domain_strategy;
                }
            }
            if !template.disable_system_proxy && metadata.platform != Platform::Unknown {
                tun.platform = Some(TunPlatformOptions {
                    http_proxy: Some(HttpProxyOptions {
                        enabled: true,
                        server: LOCALHOST.to_string(),
                        server_port: template.mixed_port(),
                        ..Default::default()
                    }),
                    ..Default::default()
                });
            }
            if let Some(custom) = &template.custom_tun {
                tun = merge_into(&tun, custom, ListMerge::Replace)
                    .context("merge custom tun options")?;
            }
            options
                .inbounds
                .push(Inbound::new("", InboundOptions::Tun(tun)));
        }

        if disable_tun || !template.disable_system_proxy {
            let mut mixed = MixedInboundOptions {
                listen: Some(LOCALHOST),
                listen_port: DEFAULT_MIXED_PORT,
                set_system_proxy: metadata.platform == Platform::Unknown
                    && disable_tun
                    && !template.disable_system_proxy,
                ..Default::default()
            };
            if disable_rule_action {
                mixed.sniff = !template.disable_sniff;
                mixed.domain_strategy = domain_strategy;
            }
            if let Some(custom) = &template.custom_mixed {
                mixed = merge_into(&mixed, custom, ListMerge::Replace)
                    .context("merge custom mixed options")?;
            }
            options
                .inbounds
                .push(Inbound::new("", InboundOptions::Mixed(mixed)));
        }
        tracing::debug!(
            inbounds = options.inbounds.len(),
            tun = !disable_tun,
            auto_redirect,
            "render inbounds"
        );
        Ok(())
    }
}
