//! Static documentation corpus for registry query synthesis. Retrieval is a
//! deterministic keyword router: the grammar and search-area fragments are
//! always included, category example fragments are selected by matching the
//! diagnosis text against each category's keyword list, in fragment-id order.

pub struct CorpusFragment {
    pub id: &'static str,
    pub title: &'static str,
    pub body: &'static str,
}

pub const GRAMMAR: CorpusFragment = CorpusFragment {
    id: "00-search-operators",
    title: "Search Operators",
    body: r#"The registry search grammar supports:
- EXPANSION[Concept]term — expand the term with medical synonyms and abbreviations
- EXPANSION[Term]term — expand with lexical variants only
- EXPANSION[None]term — exact term, no expansion
- AREA[FieldName]value — scope a term to a specific study field
- SEARCH[Location](...) — group location-scoped clauses
- AND, OR, NOT — boolean operators, uppercase
- "multi word phrase" — quote exact phrases
- ( ... ) — parentheses for grouping; must be balanced
- RANGE[low, high] — numeric/age ranges inside AREA clauses

Guidelines: prefer EXPANSION[Concept] for the main condition so synonyms are
covered; use OR between related terms; use AND only to combine distinct
concepts; avoid stacking many AND clauses, which over-restricts results."#,
};

pub const SEARCH_AREAS: CorpusFragment = CorpusFragment {
    id: "01-search-areas",
    title: "Search Areas",
    body: r#"Commonly scoped fields:
- AREA[ConditionSearch] — condition and disease terms (highest weight)
- AREA[BasicSearch] — full study record
- AREA[InterventionSearch] — drugs, devices, procedures
- AREA[OverallStatus] — RECRUITING, NOT_YET_RECRUITING, ACTIVE_NOT_RECRUITING, ...
- AREA[Phase] — PHASE1..PHASE4, EARLY_PHASE1
- AREA[StudyType] — INTERVENTIONAL, OBSERVATIONAL
- AREA[Gender] — MALE, FEMALE, ALL
- AREA[HealthyVolunteers] — restrict to studies not requiring healthy volunteers
- AREA[MinimumAge] / AREA[MaximumAge] — eligibility age bounds, e.g.
  AREA[MinimumAge]RANGE[MIN, 60 years]
- AREA[LocationCity] / AREA[LocationState] / AREA[LocationCountry]
Condition terms carry the most relevance weight; keep the condition
expression in the condition query and demographic constraints in filters."#,
};

pub const ONCOLOGY_EXAMPLES: CorpusFragment = CorpusFragment {
    id: "10-oncology-examples",
    title: "Oncology Query Examples",
    body: r#"Worked oncology examples:
- Breast cancer, HER2-positive:
  EXPANSION[Concept]"breast cancer" AND EXPANSION[Concept]"HER2 positive"
- Metastatic NSCLC:
  EXPANSION[Concept]"non-small cell lung cancer" AND (EXPANSION[Concept]metastatic OR EXPANSION[Concept]"stage IV")
- Colorectal cancer excluding pediatric studies:
  EXPANSION[Concept]"colorectal cancer" NOT AREA[StdAge]CHILD
Stage, histology and biomarker qualifiers belong in the expression; age and
recruitment status belong in filters."#,
};

pub const CARDIOLOGY_EXAMPLES: CorpusFragment = CorpusFragment {
    id: "11-cardiology-examples",
    title: "Cardiology Query Examples",
    body: r#"Worked cardiology examples:
- Heart failure with reduced ejection fraction:
  EXPANSION[Concept]"heart failure" AND (EXPANSION[Concept]"reduced ejection fraction" OR EXPANSION[Term]HFrEF)
- Post-MI secondary prevention:
  EXPANSION[Concept]"myocardial infarction" AND EXPANSION[Concept]"secondary prevention"
- Atrial fibrillation:
  EXPANSION[Concept]"atrial fibrillation" OR EXPANSION[Term]AFib"#,
};

pub const NEUROLOGY_EXAMPLES: CorpusFragment = CorpusFragment {
    id: "12-neurology-examples",
    title: "Neurology Query Examples",
    body: r#"Worked neurology examples:
- Early Alzheimer disease:
  EXPANSION[Concept]"Alzheimer disease" AND (EXPANSION[Concept]"mild cognitive impairment" OR EXPANSION[Concept]"early stage")
- Relapsing multiple sclerosis:
  EXPANSION[Concept]"multiple sclerosis" AND EXPANSION[Concept]relapsing
- Parkinson disease:
  EXPANSION[Concept]"Parkinson disease""#,
};

pub const ENDOCRINOLOGY_EXAMPLES: CorpusFragment = CorpusFragment {
    id: "13-endocrinology-examples",
    title: "Endocrinology Query Examples",
    body: r#"Worked endocrinology examples:
- Type 2 diabetes on metformin:
  EXPANSION[Concept]"type 2 diabetes" AND AREA[InterventionSearch]metformin
- Type 1 diabetes:
  EXPANSION[Concept]"type 1 diabetes mellitus" OR EXPANSION[Term]T1DM
- Hypothyroidism:
  EXPANSION[Concept]hypothyroidism"#,
};

const ONCOLOGY_KEYWORDS: &[&str] = &[
    "cancer",
    "carcinoma",
    "neoplasm",
    "tumor",
    "tumour",
    "malignant",
    "oncology",
    "sarcoma",
    "lymphoma",
    "leukemia",
    "melanoma",
    "adenocarcinoma",
    "glioblastoma",
    "myeloma",
    "metastatic",
];

const CARDIOLOGY_KEYWORDS: &[&str] = &[
    "heart",
    "cardiac",
    "cardiovascular",
    "coronary",
    "myocardial",
    "arrhythmia",
    "fibrillation",
    "hypertension",
];

const NEUROLOGY_KEYWORDS: &[&str] = &[
    "alzheimer",
    "parkinson",
    "sclerosis",
    "epilepsy",
    "stroke",
    "neuropathy",
    "dementia",
    "migraine",
];

const ENDOCRINOLOGY_KEYWORDS: &[&str] = &[
    "diabetes",
    "thyroid",
    "insulin",
    "metabolic",
    "obesity",
    "endocrine",
];

/// Retrieve the documentation fragments relevant to a diagnosis. Output
/// order is fixed (fragment id order), so retrieval is deterministic for a
/// given corpus and query.
pub fn retrieve(diagnosis: &str) -> Vec<&'static CorpusFragment> {
    let lower = diagnosis.to_lowercase();
    let mut fragments = vec![&GRAMMAR, &SEARCH_AREAS];

    let categories: [(&[&str], &'static CorpusFragment); 4] = [
        (ONCOLOGY_KEYWORDS, &ONCOLOGY_EXAMPLES),
        (CARDIOLOGY_KEYWORDS, &CARDIOLOGY_EXAMPLES),
        (NEUROLOGY_KEYWORDS, &NEUROLOGY_EXAMPLES),
        (ENDOCRINOLOGY_KEYWORDS, &ENDOCRINOLOGY_EXAMPLES),
    ];

    for (keywords, fragment) in categories {
        if keywords.iter().any(|k| lower.contains(k)) {
            fragments.push(fragment);
        }
    }

    fragments.sort_by_key(|f| f.id);
    fragments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_and_areas_always_included() {
        let fragments = retrieve("something nobody has heard of");
        let ids: Vec<_> = fragments.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec!["00-search-operators", "01-search-areas"]);
    }

    #[test]
    fn cancer_diagnosis_pulls_oncology_examples() {
        let fragments = retrieve("invasive ductal breast cancer");
        assert!(fragments.iter().any(|f| f.id == "10-oncology-examples"));
        assert!(!fragments.iter().any(|f| f.id == "11-cardiology-examples"));
    }

    #[test]
    fn retrieval_is_deterministic() {
        let a: Vec<_> = retrieve("type 2 diabetes").iter().map(|f| f.id).collect();
        let b: Vec<_> = retrieve("type 2 diabetes").iter().map(|f| f.id).collect();
        assert_eq!(a, b);
        assert!(a.contains(&"13-endocrinology-examples"));
    }
}
