pub mod patient;
pub mod trial;

pub use patient::{ConfidenceScores, ExtractionOutcome, PatientLocation, PatientRecord, Sex};
pub use trial::{
    ContactInfo, EligibilityCriteria, EligibilityJudgment, MatchFactors, RankedTrial, Trial,
    TrialLocation, TrialPhase, TrialSearchResult, TrialStatus,
};
