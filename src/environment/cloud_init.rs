use tera::{Context, Tera};

use crate::error::Result;
use crate::staging::StagedMapping;
use crate::utils::shell_quote;

pub const BOOTSTRAP_MARKER: &str = "/var/lib/farmprobe/bootstrap.done";
pub const BOOTSTRAP_LOG: &str = "/var/log/farmprobe-bootstrap.log";

/// Blocks until cloud-init is done, then fails unless bootstrap completed.
pub const BOOTSTRAP_WAIT_COMMAND: &str = "cloud-init status --wait >/dev/null 2>&1; \
     test -f /var/lib/farmprobe/bootstrap.done || \
     { tail -n 50 /var/log/farmprobe-bootstrap.log >&2; exit 1; }";

const CLOUD_INIT_TEMPLATE: &str = r#"#cloud-config
package_update: false

write_files:
  - path: /var/lib/farmprobe/session
    permissions: '0644'
    content: {{ session_id | json_encode() }}

  # Downloads staged artifacts, then runs the extra bootstrap commands
  - path: /var/lib/farmprobe/bootstrap.sh
    permissions: '0700'
    content: |
{% for line in script_lines %}      {{ line }}
{% endfor %}
runcmd:
  - ["bash", "-c", "/var/lib/farmprobe/bootstrap.sh >> {{ log_file }} 2>&1"]

final_message: "farmprobe cloud-init done in $UPTIME seconds"
"#;

fn bootstrap_script(mappings: &[StagedMapping], commands: &[String]) -> Vec<String> {
    let mut lines = vec![
        "#!/bin/bash".to_string(),
        "set -euo pipefail".to_string(),
        "rm -f /var/lib/farmprobe/bootstrap.done".to_string(),
    ];

    for mapping in mappings {
        let header = mapping
            .artifact
            .download_header
            .as_deref()
            .map(|h| format!("-H {} ", shell_quote(h)))
            .unwrap_or_default();
        lines.push(format!(
            "curl -fsSL --retry 5 --create-dirs {}-o {} {}",
            header,
            shell_quote(&mapping.destination),
            shell_quote(&mapping.artifact.url)
        ));
    }

    for command in commands {
        lines.extend(command.lines().map(str::to_string));
    }

    lines.push(format!("touch {}", BOOTSTRAP_MARKER));
    lines
}

/// Render the bootstrap user data for a target.
pub fn generate_cloud_init(
    session_id: &str,
    mappings: &[StagedMapping],
    commands: &[String],
) -> Result<String> {
    let mut tera = Tera::default();
    tera.add_raw_template("cloud-init", CLOUD_INIT_TEMPLATE)?;

    let mut context = Context::new();
    context.insert("session_id", session_id);
    context.insert("script_lines", &bootstrap_script(mappings, commands));
    context.insert("log_file", BOOTSTRAP_LOG);

    let rendered = tera.render("cloud-init", &context)?;
    Ok(rendered)
}
