//! First-boot seed documents.
//!
//! Renders `meta-data`, `user-data`, and `network-config` for the NoCloud
//! datasource. Rendering is pure and deterministic: the same inputs always
//! produce byte-identical documents.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use idve_common::{Credentials, OsFamily, ProvisioningNetwork, ProvisioningTemplate};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use sha2::{Digest, Sha256};

/// Volume label the NoCloud datasource looks for.
pub const SEED_VOLUME_LABEL: &str = "cidata";

/// Package installed when the guest agent channel is enabled.
pub const GUEST_AGENT_PACKAGE: &str = "qemu-guest-agent";

const DEFAULT_NAMESERVERS: &[&str] = &["8.8.8.8", "8.8.4.4"];

#[allow(clippy::expect_used)] // Pattern is a compile-time constant
static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z_]+)\}").expect("valid placeholder pattern"));

/// Instance facts substituted into a template.
#[derive(Debug, Clone)]
pub struct SeedInput<'a> {
    pub instance_id: &'a str,
    pub hostname: &'a str,
    pub domain: Option<&'a str>,
    pub credentials: Option<&'a Credentials>,
    pub network: Option<&'a ProvisioningNetwork>,
    /// MAC of the NIC the network config binds to.
    pub mac: Option<&'a str>,
    pub guest_agent: bool,
}

/// The rendered seed documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedDocuments {
    pub meta_data: String,
    pub user_data: String,
    pub network_config: Option<String>,
}

impl SeedDocuments {
    /// SHA-256 over every document, in a fixed order.
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for doc in [
            Some(&self.meta_data),
            Some(&self.user_data),
            self.network_config.as_ref(),
        ]
        .into_iter()
        .flatten()
        {
            hasher.update(doc.as_bytes());
            hasher.update([0u8]);
        }
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    /// File name and contents of each document to stage.
    #[must_use]
    pub fn files(&self) -> Vec<(&'static str, &str)> {
        let mut files = vec![
            ("meta-data", self.meta_data.as_str()),
            ("user-data", self.user_data.as_str()),
        ];
        if let Some(net) = &self.network_config {
            files.push(("network-config", net.as_str()));
        }
        files
    }
}

/// Render all seed documents for an instance.
///
/// # Errors
///
/// Returns an error if the template's user-data is not valid YAML.
pub fn render(template: &ProvisioningTemplate, input: &SeedInput<'_>) -> Result<SeedDocuments> {
    Ok(SeedDocuments {
        meta_data: render_meta_data(input)?,
        user_data: render_user_data(template, input)?,
        network_config: input
            .network
            .map(|net| render_network_config(net, input))
            .transpose()?,
    })
}

fn fqdn(input: &SeedInput<'_>) -> String {
    match input.domain {
        Some(domain) if !domain.is_empty() => format!("{}.{domain}", input.hostname),
        _ => input.hostname.to_string(),
    }
}

fn render_meta_data(input: &SeedInput<'_>) -> Result<String> {
    let mut doc = Mapping::new();
    doc.insert("instance-id".into(), input.instance_id.into());
    doc.insert("local-hostname".into(), input.hostname.into());
    serde_yaml::to_string(&doc).context("serializing meta-data")
}

fn render_user_data(template: &ProvisioningTemplate, input: &SeedInput<'_>) -> Result<String> {
    let mut values: HashMap<&str, String> = HashMap::new();
    values.insert("INSTANCE_ID", input.instance_id.to_string());
    values.insert("HOSTNAME", input.hostname.to_string());
    values.insert("FQDN", fqdn(input));
    if let Some(domain) = input.domain {
        values.insert("DOMAIN", domain.to_string());
    }
    let username = input
        .credentials
        .map_or(template.default_user.as_str(), |c| c.username.as_str());
    values.insert("USERNAME", username.to_string());
    if let Some(creds) = input.credentials {
        if let Some(password) = &creds.password {
            values.insert("PASSWORD", password.clone());
        }
        if let Some(key) = &creds.ssh_key {
            values.insert("SSH_KEY", key.trim().to_string());
        }
    }

    let parsed: Value = serde_yaml::from_str(&template.user_data)
        .with_context(|| format!("parsing user-data of template '{}'", template.name))?;
    let mut doc = substitute(parsed, &values).unwrap_or(Value::Mapping(Mapping::new()));

    let mut packages = template.packages.clone();
    if input.guest_agent {
        packages.push(GUEST_AGENT_PACKAGE.to_string());
    }
    if let Value::Mapping(map) = &mut doc {
        merge_packages(map, &packages);
        if input.guest_agent {
            append_runcmd(map, agent_commands(template.os_family));
        }
    }

    let body = serde_yaml::to_string(&doc).context("serializing user-data")?;
    Ok(format!("#cloud-config\n{body}"))
}

/// Replace placeholders in every string scalar.
///
/// A scalar referencing a placeholder with no value is dropped: removed from
/// its sequence or its mapping. Returns `None` when `value` itself is dropped.
fn substitute(value: Value, values: &HashMap<&str, String>) -> Option<Value> {
    match value {
        Value::String(s) => {
            let mut missing = false;
            let replaced = PLACEHOLDER.replace_all(&s, |caps: &regex::Captures<'_>| {
                values.get(&caps[1]).cloned().unwrap_or_else(|| {
                    missing = true;
                    String::new()
                })
            });
            if missing {
                None
            } else {
                Some(Value::String(replaced.into_owned()))
            }
        }
        Value::Sequence(items) => Some(Value::Sequence(
            items
                .into_iter()
                .filter_map(|item| substitute(item, values))
                .collect(),
        )),
        Value::Mapping(map) => Some(Value::Mapping(
            map.into_iter()
                .filter_map(|(k, v)| substitute(v, values).map(|v| (k, v)))
                .collect(),
        )),
        other => Some(other),
    }
}

fn merge_packages(doc: &mut Mapping, extra: &[String]) {
    if extra.is_empty() {
        return;
    }
    let key = Value::from("packages");
    let mut packages: Vec<Value> = match doc.remove(&key) {
        Some(Value::Sequence(seq)) => seq,
        _ => Vec::new(),
    };
    for pkg in extra {
        let pkg = Value::from(pkg.as_str());
        if !packages.contains(&pkg) {
            packages.push(pkg);
        }
    }
    doc.insert(key, Value::Sequence(packages));
}

/// Commands that enable and start the guest agent on first boot.
fn agent_commands(family: OsFamily) -> &'static [&'static [&'static str]] {
    match family {
        OsFamily::Linux => &[&["systemctl", "enable", "--now", GUEST_AGENT_PACKAGE]],
        OsFamily::Freebsd => &[
            &["sysrc", "qemu_guest_agent_enable=YES"],
            &["service", GUEST_AGENT_PACKAGE, "start"],
        ],
        _ => &[],
    }
}

fn append_runcmd(doc: &mut Mapping, commands: &[&[&str]]) {
    if commands.is_empty() {
        return;
    }
    let key = Value::from("runcmd");
    let mut runcmd: Vec<Value> = match doc.remove(&key) {
        Some(Value::Sequence(seq)) => seq,
        _ => Vec::new(),
    };
    for cmd in commands {
        let cmd = Value::Sequence(cmd.iter().map(|arg| Value::from(*arg)).collect());
        if !runcmd.contains(&cmd) {
            runcmd.push(cmd);
        }
    }
    doc.insert(key, Value::Sequence(runcmd));
}

fn render_network_config(net: &ProvisioningNetwork, input: &SeedInput<'_>) -> Result<String> {
    let mut matcher = Mapping::new();
    match input.mac {
        Some(mac) => matcher.insert("macaddress".into(), mac.into()),
        None => matcher.insert("name".into(), "e*".into()),
    };

    let mut iface = Mapping::new();
    iface.insert("match".into(), Value::Mapping(matcher));
    iface.insert("set-name".into(), "eth0".into());
    match net {
        ProvisioningNetwork::Dhcp => {
            iface.insert("dhcp4".into(), true.into());
            iface.insert("dhcp6".into(), false.into());
        }
        ProvisioningNetwork::Static {
            address,
            gateway,
            dns,
        } => {
            iface.insert("dhcp4".into(), false.into());
            iface.insert(
                "addresses".into(),
                Value::Sequence(vec![address.as_str().into()]),
            );
            if let Some(gateway) = gateway {
                let mut route = Mapping::new();
                route.insert("to".into(), "0.0.0.0/0".into());
                route.insert("via".into(), gateway.as_str().into());
                iface.insert(
                    "routes".into(),
                    Value::Sequence(vec![Value::Mapping(route)]),
                );
            }
            let servers: Vec<Value> = if dns.is_empty() {
                DEFAULT_NAMESERVERS.iter().map(|s| Value::from(*s)).collect()
            } else {
                dns.iter().map(|s| Value::from(s.as_str())).collect()
            };
            let mut nameservers = Mapping::new();
            nameservers.insert("addresses".into(), Value::Sequence(servers));
            if let Some(domain) = input.domain.filter(|d| !d.is_empty()) {
                nameservers.insert("search".into(), Value::Sequence(vec![domain.into()]));
            }
            iface.insert("nameservers".into(), Value::Mapping(nameservers));
        }
    }

    let mut ethernets = Mapping::new();
    ethernets.insert("eth0".into(), Value::Mapping(iface));
    let mut doc = Mapping::new();
    doc.insert("version".into(), 2.into());
    doc.insert("ethernets".into(), Value::Mapping(ethernets));
    serde_yaml::to_string(&doc).context("serializing network-config")
}

// ── Built-in templates ────────────────────────────────────────────────────────

const LINUX_USER_DATA: &str = r#"
hostname: ${HOSTNAME}
fqdn: ${FQDN}
manage_etc_hosts: true
users:
  - name: ${USERNAME}
    groups: [__ADMIN_GROUP__]
    sudo: "ALL=(ALL) NOPASSWD:ALL"
    shell: /bin/bash
    lock_passwd: false
    plain_text_passwd: ${PASSWORD}
    ssh_authorized_keys:
      - ${SSH_KEY}
chpasswd:
  expire: false
ssh_pwauth: true
package_update: true
"#;

const FREEBSD_USER_DATA: &str = r#"
hostname: ${HOSTNAME}
fqdn: ${FQDN}
users:
  - name: ${USERNAME}
    groups: [wheel]
    sudo: "ALL=(ALL) NOPASSWD:ALL"
    shell: /bin/sh
    lock_passwd: false
    plain_text_passwd: ${PASSWORD}
    ssh_authorized_keys:
      - ${SSH_KEY}
ssh_pwauth: true
"#;

fn linux_template(name: &str, default_user: &str, admin_group: &str) -> ProvisioningTemplate {
    ProvisioningTemplate {
        name: name.to_string(),
        os_family: OsFamily::Linux,
        default_user: default_user.to_string(),
        base_image: None,
        user_data: LINUX_USER_DATA.replace("__ADMIN_GROUP__", admin_group),
        packages: Vec::new(),
    }
}

/// Templates used when no template file is installed.
#[must_use]
pub fn builtin_templates() -> Vec<ProvisioningTemplate> {
    vec![
        linux_template("ubuntu-22.04", "ubuntu", "sudo"),
        linux_template("ubuntu-24.04", "ubuntu", "sudo"),
        linux_template("debian-12", "debian", "sudo"),
        linux_template("rocky-9", "rocky", "wheel"),
        ProvisioningTemplate {
            name: "freebsd-14".to_string(),
            os_family: OsFamily::Freebsd,
            default_user: "freebsd".to_string(),
            base_image: None,
            user_data: FREEBSD_USER_DATA.to_string(),
            packages: vec!["sudo".to_string()],
        },
    ]
}
