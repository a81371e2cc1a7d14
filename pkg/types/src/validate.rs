use anyhow::{Result, bail};

use crate::stack::Stack;

/// Validate a cluster resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > 63 {
        bail!("name '{}' exceeds 63 characters (got {})", name, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// A configuration resource name must be prefixed by the owning Stack's
/// name, so a generated resource cannot alias one of a different Stack.
pub fn validate_configuration_resource_name(stack: &str, resource: &str) -> Result<()> {
    if !resource.starts_with(stack) {
        bail!(
            "configuration resource name must be prefixed by stack name. resource: {}, stack: {}",
            resource,
            stack
        );
    }
    Ok(())
}

/// Checks every configuration resource reference in the stack spec.
pub fn validate_all_configuration_resource_names(stack: &Stack) -> Result<()> {
    for rsc in &stack.spec.configuration_resources {
        validate_configuration_resource_name(&stack.metadata.name, &rsc.name)?;
    }
    Ok(())
}
