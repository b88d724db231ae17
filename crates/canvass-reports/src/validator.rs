//! Validation of user-supplied report selections against the analyzed
//! options.

use std::collections::{HashMap, HashSet};

use canvass_core::{Error, EvaluationId, PromptId, Result};

use crate::types::{PromptSelection, PromptSelectionInfo};

/// Validate selections and normalize them to one entry per group prompt.
///
/// Rejected: prompt ids outside the group, duplicate prompt ids, and
/// evaluation ids that are not among that prompt's available options.
/// Prompts the user did not mention get their default selection when
/// `use_defaults_for_unspecified` is set, otherwise stay awaiting
/// (`evaluation_id = None`). Output follows group prompt order.
pub fn validate_selections(
    selections: &[PromptSelection],
    prompt_info: &[PromptSelectionInfo],
    use_defaults_for_unspecified: bool,
) -> Result<Vec<PromptSelection>> {
    let mut errors = Vec::new();

    let info_by_prompt: HashMap<PromptId, &PromptSelectionInfo> =
        prompt_info.iter().map(|info| (info.prompt_id, info)).collect();

    let valid_options: HashMap<PromptId, HashSet<EvaluationId>> = prompt_info
        .iter()
        .map(|info| {
            (
                info.prompt_id,
                info.available_options
                    .iter()
                    .map(|option| option.evaluation_id)
                    .collect(),
            )
        })
        .collect();

    let mut seen = HashSet::new();
    for selection in selections {
        if !seen.insert(selection.prompt_id) {
            errors.push(format!(
                "duplicate prompt_id in selections: {}",
                selection.prompt_id
            ));
        }
    }

    for selection in selections {
        if !info_by_prompt.contains_key(&selection.prompt_id) {
            errors.push(format!(
                "prompt_id {} does not belong to this group",
                selection.prompt_id
            ));
            continue;
        }

        if let Some(evaluation_id) = selection.evaluation_id
            && !valid_options
                .get(&selection.prompt_id)
                .is_some_and(|options| options.contains(&evaluation_id))
        {
            errors.push(format!(
                "evaluation_id {evaluation_id} is not a valid completed evaluation \
                 for prompt_id {}",
                selection.prompt_id
            ));
        }
    }

    if !errors.is_empty() {
        return Err(Error::InvalidSelection(errors));
    }

    let chosen: HashMap<PromptId, &PromptSelection> = selections
        .iter()
        .map(|selection| (selection.prompt_id, selection))
        .collect();

    Ok(prompt_info
        .iter()
        .map(|info| match chosen.get(&info.prompt_id) {
            Some(selection) => **selection,
            None => PromptSelection {
                prompt_id: info.prompt_id,
                evaluation_id: if use_defaults_for_unspecified {
                    info.default_selection
                } else {
                    None
                },
            },
        })
        .collect())
}
