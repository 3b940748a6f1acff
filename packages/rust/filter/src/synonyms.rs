//! Built-in research vocabulary, enabled with `filter.builtin_synonyms`.

use std::collections::BTreeMap;

const BUILTIN: &[(&str, &[&str])] = &[
    // chemistry
    ("molecular", &["molecule", "molecules", "chemical", "chemistry"]),
    ("drug", &["pharmaceutical", "medication", "medicine", "therapeutic"]),
    ("compound", &["chemical compound", "small molecule"]),
    ("generation", &["generative", "generating", "synthesis", "synthesizing"]),
    ("design", &["designing", "discovery", "screening"]),
    // machine learning
    ("diffusion", &["diffusion model", "diffusion-based"]),
    ("transformer", &["attention", "self-attention"]),
    ("graph", &["graph neural network", "gnn", "graph-based"]),
    ("learning", &["machine learning", "ml", "deep learning"]),
    // biology
    ("protein", &["proteins", "peptide", "amino acid"]),
    ("binding", &["affinity", "docking", "interaction"]),
    ("target", &["receptor", "enzyme", "protein target"]),
];

/// Merge the built-in table under `user`. User entries replace built-ins with the same key.
pub(crate) fn merged_with_builtin(
    user: &BTreeMap<String, Vec<String>>,
) -> BTreeMap<String, Vec<String>> {
    let mut merged: BTreeMap<String, Vec<String>> = BUILTIN
        .iter()
        .map(|(k, alts)| (k.to_string(), alts.iter().map(|a| a.to_string()).collect()))
        .collect();
    merged.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
