//! Remediation planning.
//!
//! A `video_codec` issue always forces a full conversion; any other issue
//! is fixed by repackaging.

use serde::Serialize;
use vn_core::config::{ConversionConfig, PolicyConfig};
use vn_core::{AudioCodec, Container, IssueType, Method, VideoCodec};

use crate::analysis::Analysis;
use crate::detect::IssueSet;

/// What to do with one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Plan {
    pub method: Method,
    /// Re-encode video to this codec; `None` keeps the bitstream.
    pub target_video_codec: Option<VideoCodec>,
    /// Re-encode audio to this codec; `None` copies the audio stream.
    pub target_audio_codec: Option<AudioCodec>,
    pub target_container: Container,
    /// This plan replaced a failed quick fix.
    pub escalated: bool,
}

/// Maps issues to a remediation plan.
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    policy: PolicyConfig,
    conversion: ConversionConfig,
}

impl DecisionEngine {
    pub fn new(policy: PolicyConfig, conversion: ConversionConfig) -> Self {
        Self { policy, conversion }
    }

    /// Choose the method for `issues`.
    pub fn decide(issues: &IssueSet) -> Method {
        if issues.is_empty() {
            Method::None
        } else if issues.contains(IssueType::VideoCodec) {
            Method::FullConversion
        } else {
            Method::QuickFix
        }
    }

    /// Build the plan for `analysis`.
    pub fn plan(&self, analysis: &Analysis) -> Plan {
        let method = Self::decide(analysis.issues());
        let (target_video_codec, target_audio_codec) = match method {
            Method::FullConversion => {
                let audio = analysis
                    .issues()
                    .contains(IssueType::AudioCodec)
                    .then_some(self.conversion.target_audio_codec);
                (Some(self.conversion.target_video_codec), audio)
            }
            Method::None | Method::QuickFix => (None, None),
        };

        let plan = Plan {
            method,
            target_video_codec,
            target_audio_codec,
            target_container: self.policy.target_container,
            escalated: false,
        };
        tracing::debug!(
            path = %analysis.path().display(),
            method = %plan.method,
            video = ?plan.target_video_codec,
            audio = ?plan.target_audio_codec,
            "plan chosen"
        );
        plan
    }

    /// Turn a quick-fix plan into a full conversion after the repackage
    /// step proved impossible. Audio is re-encoded when its codec is outside
    /// the allow-list.
    pub fn escalate(&self, plan: &Plan, analysis: &Analysis) -> Plan {
        let audio_disallowed = analysis
            .audio_codec()
            .map(|c| !self.policy.allowed_audio_codecs.contains(&c))
            .unwrap_or(false);

        Plan {
            method: Method::FullConversion,
            target_video_codec: Some(self.conversion.target_video_codec),
            target_audio_codec: audio_disallowed.then_some(self.conversion.target_audio_codec),
            target_container: plan.target_container,
            escalated: true,
        }
    }
}
