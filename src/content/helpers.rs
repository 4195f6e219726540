//! Shell-side installation of the rich-content helpers.
//!
//! Each kind gets one bash function that buffers stdin to a uniquely
//! named temp file and emits the sentinel line (with an optional
//! display-id argument) on the diagnostic stream. External programs need
//! no protocol knowledge beyond "pipe into this named helper". The
//! capability list is exported so programs can probe for support.

use crate::content::ContentSpec;

/// Environment variable carrying the comma-joined supported kinds.
pub const CAPABILITIES_ENV: &str = "SHELLBRIDGE_CAPABILITIES";

/// One function per spec, then the capability export. Re-running the
/// whole script is harmless: functions are redefined identically and the
/// export is recomputed from the same table.
pub(crate) fn setup_script(specs: &[ContentSpec]) -> String {
    let mut script = String::new();
    let mut installed: Vec<&str> = Vec::new();
    for spec in specs {
        if installed.contains(&spec.helper) {
            continue;
        }
        installed.push(spec.helper);
        script.push_str(&helper_function(spec));
        script.push('\n');
    }
    script.push_str(&format!(
        "export {}=\"{}\"",
        CAPABILITIES_ENV,
        capabilities(specs)
    ));
    script
}

fn helper_function(spec: &ContentSpec) -> String {
    format!(
        concat!(
            "{name} () {{ ",
            "TMPFILE=$(mktemp \"${{TMPDIR-/tmp}}/shellbridge.XXXXXXXXXX\"); ",
            "cat > \"$TMPFILE\"; ",
            "if [ -n \"$1\" ]; then echo \"{prefix}($1) $TMPFILE\" >&2; ",
            "else echo \"{prefix}$TMPFILE\" >&2; fi; }}"
        ),
        name = spec.helper,
        prefix = spec.prefix,
    )
}

pub(crate) fn capabilities(specs: &[ContentSpec]) -> String {
    let mut seen: Vec<&str> = Vec::new();
    for spec in specs {
        if !seen.contains(&spec.capability) {
            seen.push(spec.capability);
        }
    }
    seen.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::default_specs;

    #[test]
    fn script_defines_each_helper_once() {
        let mut specs = default_specs();
        specs.extend(default_specs());
        let script = setup_script(&specs);
        assert_eq!(script.matches("display ()").count(), 1);
        assert_eq!(script.matches("displayHTML ()").count(), 1);
    }

    #[test]
    fn script_exports_the_capability_list() {
        let script = setup_script(&default_specs());
        assert!(script.contains("export SHELLBRIDGE_CAPABILITIES=\"image,html\""));
    }

    #[test]
    fn helpers_emit_the_sentinel_with_optional_id() {
        let script = setup_script(&default_specs());
        assert!(script.contains("echo \"shellbridge: saved image data to: ($1) $TMPFILE\" >&2"));
        assert!(script.contains("echo \"shellbridge: saved image data to: $TMPFILE\" >&2"));
    }
}
