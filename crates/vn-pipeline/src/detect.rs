//! Compatibility issue detection.
//!
//! [`IssueDetector`] runs a fixed list of independent rules over an
//! [`Analysis`]. Rules never see each other's output; the resulting
//! [`IssueSet`] keeps at most one issue per [`IssueType`] in detection order.

use serde::Serialize;
use vn_core::config::PolicyConfig;
use vn_core::{IssueType, Severity, StreamKind};

use crate::analysis::Analysis;

/// One detected compatibility problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    #[serde(rename = "type")]
    pub kind: IssueType,
    pub severity: Severity,
    pub description: String,
}

impl Issue {
    pub fn new(kind: IssueType, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            description: description.into(),
        }
    }
}

/// Ordered set of issues, unique by type. The first issue of a type wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct IssueSet(Vec<Issue>);

impl IssueSet {
    /// Add `issue` unless one of the same type is already present.
    /// Returns whether it was added.
    pub fn insert(&mut self, issue: Issue) -> bool {
        if self.contains(issue.kind) {
            tracing::trace!(kind = %issue.kind, "duplicate issue merged");
            return false;
        }
        self.0.push(issue);
        true
    }

    pub fn contains(&self, kind: IssueType) -> bool {
        self.0.iter().any(|i| i.kind == kind)
    }

    pub fn get(&self, kind: IssueType) -> Option<&Issue> {
        self.0.iter().find(|i| i.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Issue> {
        self.0.iter()
    }

    /// Issue types in detection order.
    pub fn kinds(&self) -> Vec<IssueType> {
        self.0.iter().map(|i| i.kind).collect()
    }

    /// Highest severity present.
    pub fn max_severity(&self) -> Option<Severity> {
        self.0.iter().map(|i| i.severity).max()
    }
}

impl FromIterator<Issue> for IssueSet {
    fn from_iter<T: IntoIterator<Item = Issue>>(iter: T) -> Self {
        let mut set = IssueSet::default();
        for issue in iter {
            set.insert(issue);
        }
        set
    }
}

impl<'a> IntoIterator for &'a IssueSet {
    type Item = &'a Issue;
    type IntoIter = std::slice::Iter<'a, Issue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Audio sample entry that players expect for AAC.
const CANONICAL_AAC_TAG: &str = "mp4a";

type Rule = fn(&PolicyConfig, &Analysis) -> Option<Issue>;

/// Rules in evaluation order.
const RULES: &[Rule] = &[
    stream_order_rule,
    audio_codec_rule,
    video_codec_rule,
    profile_rule,
    container_rule,
];

/// Runs the issue rules against an analysis.
#[derive(Debug, Clone, Default)]
pub struct IssueDetector {
    policy: PolicyConfig,
}

impl IssueDetector {
    pub fn new(policy: PolicyConfig) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    /// Detect issues. The analysis' own issue list is ignored.
    pub fn detect(&self, analysis: &Analysis) -> IssueSet {
        let issues: IssueSet = RULES
            .iter()
            .filter_map(|rule| rule(&self.policy, analysis))
            .collect();

        if !issues.is_empty() {
            tracing::debug!(
                path = %analysis.path().display(),
                issues = ?issues.kinds(),
                "issues detected"
            );
        }
        issues
    }
}

fn stream_order_rule(policy: &PolicyConfig, a: &Analysis) -> Option<Issue> {
    let canonical = policy.canonical_first_stream;
    let first = *a.stream_order().first()?;
    if first == canonical || !a.stream_order().contains(&canonical) {
        return None;
    }
    Some(Issue::new(
        IssueType::StreamOrder,
        Severity::Low,
        format!("{first} stream is stored before the {canonical} stream"),
    ))
}

fn audio_codec_rule(policy: &PolicyConfig, a: &Analysis) -> Option<Issue> {
    let codec = a.audio_codec()?;
    let name = a.audio_codec_name().unwrap_or("unknown");

    if !policy.allowed_audio_codecs.contains(&codec) {
        return Some(Issue::new(
            IssueType::AudioCodec,
            Severity::Medium,
            format!("audio codec {name} is not directly deliverable"),
        ));
    }

    let profile = a.audio_profile()?;
    let needs_retag = policy
        .retag_audio_profiles
        .iter()
        .any(|p| p.eq_ignore_ascii_case(profile));
    let tagged = a
        .audio_codec_tag()
        .map(|t| t.eq_ignore_ascii_case(CANONICAL_AAC_TAG))
        .unwrap_or(false);

    if needs_retag && !tagged {
        return Some(Issue::new(
            IssueType::AudioCodec,
            Severity::Medium,
            format!("{profile} audio is not tagged as {CANONICAL_AAC_TAG}"),
        ));
    }
    None
}

fn video_codec_rule(policy: &PolicyConfig, a: &Analysis) -> Option<Issue> {
    let codec = a.video_codec()?;
    if policy.allowed_video_codecs.contains(&codec) {
        return None;
    }
    let allowed: Vec<String> = policy
        .allowed_video_codecs
        .iter()
        .map(|c| c.to_string())
        .collect();
    Some(Issue::new(
        IssueType::VideoCodec,
        Severity::High,
        format!(
            "video codec {} is outside the allow-list [{}]",
            a.video_codec_name().unwrap_or("unknown"),
            allowed.join(", ")
        ),
    ))
}

fn profile_rule(policy: &PolicyConfig, a: &Analysis) -> Option<Issue> {
    let codec = a.video_codec()?;
    if !policy.allowed_video_codecs.contains(&codec) {
        return None;
    }

    if let Some(profile) = a.video_profile() {
        let allowed = policy.allowed_video_profiles.is_empty()
            || policy
                .allowed_video_profiles
                .iter()
                .any(|p| p.eq_ignore_ascii_case(profile));
        if !allowed {
            return Some(Issue::new(
                IssueType::ProfileMismatch,
                Severity::Medium,
                format!("{codec} profile {profile} is not supported"),
            ));
        }
    }

    match (a.video_level(), policy.max_video_level) {
        (Some(level), Some(max)) if level > max => Some(Issue::new(
            IssueType::ProfileMismatch,
            Severity::Medium,
            format!("{codec} level {level} exceeds maximum {max}"),
        )),
        _ => None,
    }
}

fn container_rule(policy: &PolicyConfig, a: &Analysis) -> Option<Issue> {
    if policy.allowed_containers.contains(&a.container()) {
        return None;
    }
    Some(Issue::new(
        IssueType::Container,
        Severity::Medium,
        format!("container {} is not deliverable", a.container()),
    ))
}

/// Whether every stream of the canonical kind precedes every other stream.
pub(crate) fn is_canonical_order(order: &[StreamKind], canonical: StreamKind) -> bool {
    let first_other = order.iter().position(|k| *k != canonical);
    match first_other {
        Some(pos) => !order[pos..].contains(&canonical),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        aac_audio, av1_video, h264_video, he_aac_audio, hevc_video, media_file, opus_audio,
    };
    use vn_av::StreamInfo;
    use vn_core::Container;

    fn analyze(container: Container, streams: Vec<StreamInfo>) -> Analysis {
        let media = media_file("/m/in", container, streams);
        Analysis::from_media(media, &IssueDetector::default())
    }

    #[test]
    fn compliant_file_has_no_issues() {
        let a = analyze(Container::Mp4, vec![h264_video(0, 1920, 1080), aac_audio(1)]);
        assert!(a.issues().is_empty());
    }

    #[test]
    fn misordered_he_aac() {
        let a = analyze(Container::Mp4, vec![he_aac_audio(0), h264_video(1, 1920, 1080)]);
        assert_eq!(
            a.issues().kinds(),
            vec![IssueType::StreamOrder, IssueType::AudioCodec]
        );
        assert_eq!(a.issues().get(IssueType::StreamOrder).unwrap().severity, Severity::Low);
    }

    #[test]
    fn tagged_he_aac_is_fine() {
        let mut audio = he_aac_audio(1);
        audio.codec_tag = Some("mp4a".into());
        let a = analyze(Container::Mp4, vec![h264_video(0, 1920, 1080), audio]);
        assert!(a.issues().is_empty());
    }

    #[test]
    fn av1_opus_in_webm() {
        let a = analyze(Container::Webm, vec![av1_video(0), opus_audio(1)]);
        assert_eq!(
            a.issues().kinds(),
            vec![IssueType::AudioCodec, IssueType::VideoCodec, IssueType::Container]
        );
        assert_eq!(a.issues().max_severity(), Some(Severity::High));
    }

    #[test]
    fn hevc_with_aac() {
        let a = analyze(Container::Mp4, vec![hevc_video(0), aac_audio(1)]);
        assert_eq!(a.issues().kinds(), vec![IssueType::VideoCodec]);
    }

    #[test]
    fn disallowed_profile_and_level() {
        let mut video = h264_video(0, 1920, 1080);
        video.profile = Some("High 10".into());
        let a = analyze(Container::Mp4, vec![video, aac_audio(1)]);
        assert_eq!(a.issues().kinds(), vec![IssueType::ProfileMismatch]);

        let mut video = h264_video(0, 7680, 4320);
        video.level = Some(61);
        let a = analyze(Container::Mp4, vec![video, aac_audio(1)]);
        let issue = a.issues().get(IssueType::ProfileMismatch).unwrap();
        assert!(issue.description.contains("61"));
    }

    #[test]
    fn profile_rule_ignores_disallowed_codecs() {
        let mut video = hevc_video(0);
        video.profile = Some("Main 10".into());
        let a = analyze(Container::Mp4, vec![video]);
        assert_eq!(a.issues().kinds(), vec![IssueType::VideoCodec]);
    }

    #[test]
    fn audio_only_never_flags_order() {
        let a = analyze(Container::Mp4, vec![aac_audio(0), aac_audio(1)]);
        assert!(!a.issues().contains(IssueType::StreamOrder));
    }

    #[test]
    fn subtitle_first_flags_order() {
        let sub = StreamInfo::new(0, StreamKind::Subtitle, "mov_text");
        let a = analyze(Container::Mp4, vec![sub, h264_video(1, 640, 360), aac_audio(2)]);
        assert_eq!(a.issues().kinds(), vec![IssueType::StreamOrder]);
    }

    #[test]
    fn issue_set_first_wins() {
        let mut set = IssueSet::default();
        assert!(set.insert(Issue::new(IssueType::AudioCodec, Severity::Medium, "first")));
        assert!(!set.insert(Issue::new(IssueType::AudioCodec, Severity::High, "second")));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(IssueType::AudioCodec).unwrap().description, "first");
    }

    #[test]
    fn issue_set_serializes_as_list() {
        let set: IssueSet = vec![Issue::new(IssueType::Container, Severity::Medium, "mkv")]
            .into_iter()
            .collect();
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json[0]["type"], "container");
        assert_eq!(json[0]["severity"], "medium");
    }

    #[test]
    fn canonical_order_check() {
        use StreamKind::*;
        assert!(is_canonical_order(&[Video, Audio, Audio], Video));
        assert!(is_canonical_order(&[Audio], Video));
        assert!(!is_canonical_order(&[Audio, Video], Video));
        assert!(!is_canonical_order(&[Video, Audio, Video], Video));
    }
}
