//! Command catalogue.
//!
//! Each subsystem module lists its command templates and the records they
//! carry, plus a thin facade whose methods only compose a command and hand
//! it to [`Core`](crate::io::Core). All marshalling lives in `scpi-core`.

pub mod bluetooth;

pub use bluetooth::{
    BluetoothMeas, DevmStruct, PowerVsTimeResult, Repetition, RepetitionStruct,
    TriggerSourceStruct,
};

use scpi_core::{CommandTree, GroupId, ScpiResult};

/// Repeated capability shared by every measurement group.
pub const INSTANCE: &str = "Instance";

/// Default instance bound when a caller does not choose one.
pub const DEFAULT_INSTANCE: u32 = 1;

/// Every template of the catalogue.
pub fn templates() -> impl Iterator<Item = &'static str> {
    bluetooth::COMMANDS.iter().copied()
}

/// Build the command tree with `Instance` defaulting to 1 on every group
/// that declares it.
pub fn command_tree() -> ScpiResult<CommandTree> {
    let templates: Vec<&str> = templates().collect();
    let mut tree = CommandTree::from_catalogue(&templates)?;

    let placeholder = format!("<{}>", INSTANCE);
    let mut stack: Vec<GroupId> = tree.roots().to_vec();
    let mut repcap_groups = Vec::new();
    while let Some(id) = stack.pop() {
        if tree.segment(id).contains(&placeholder) {
            repcap_groups.push(id);
        }
        stack.extend_from_slice(tree.children(id));
    }
    for id in repcap_groups {
        tree.set_default(id, INSTANCE, DEFAULT_INSTANCE);
    }
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scpi_core::Bindings;

    #[test]
    fn test_tree_contains_every_template() {
        let tree = command_tree().unwrap();
        let leaves = tree.leaf_templates();
        for template in templates() {
            assert!(leaves.iter().any(|l| l == template), "{template}");
        }
    }

    #[test]
    fn test_instance_defaults_to_one() {
        let tree = command_tree().unwrap();
        let leaf = tree.lookup(bluetooth::HDR_P8H_DEVM).unwrap();
        assert_eq!(
            tree.compose(leaf, &Bindings::new()).unwrap(),
            "CONFigure:BLUetooth:MEASurement1:HDR:LIMit:P8H:DEVM"
        );
    }
}
