//! MR review event-type mapping: remote GitLab note/system-note shapes to
//! the canonical taxonomy.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewEventType {
    Approve,
    Unapprove,
    Merge,
    Close,
    Reopen,
    Assign,
    ReviewerAssign,
    Label,
    Milestone,
    CodeComment,
    Comment,
}

impl ReviewEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewEventType::Approve => "approve",
            ReviewEventType::Unapprove => "unapprove",
            ReviewEventType::Merge => "merge",
            ReviewEventType::Close => "close",
            ReviewEventType::Reopen => "reopen",
            ReviewEventType::Assign => "assign",
            ReviewEventType::ReviewerAssign => "reviewer_assign",
            ReviewEventType::Label => "label",
            ReviewEventType::Milestone => "milestone",
            ReviewEventType::CodeComment => "code_comment",
            ReviewEventType::Comment => "comment",
        }
    }
}

/// The minimal shape of a remote note needed to classify it; concrete
/// deserialization from the GitLab wire format belongs to the remote
/// client (an external collaborator).
#[derive(Debug, Clone)]
pub struct RemoteNote<'a> {
    pub system: bool,
    /// The system-note's free text body (e.g. `"approved this merge
    /// request"`); ignored when `system` is false.
    pub body: &'a str,
    /// Present for notes anchored to a diff line.
    pub has_position: bool,
}

/// Classify one remote note into a [`ReviewEventType`].
/// System notes are matched by keyword; diff-anchored notes become
/// `code_comment`; everything else is a plain `comment`.
pub fn classify_note(note: &RemoteNote<'_>) -> ReviewEventType {
    if note.system {
        let body = note.body.to_lowercase();
        if body.contains("unapproved") {
            return ReviewEventType::Unapprove;
        }
        if body.contains("approved") {
            return ReviewEventType::Approve;
        }
        if body.contains("merged") {
            return ReviewEventType::Merge;
        }
        if body.contains("closed") {
            return ReviewEventType::Close;
        }
        if body.contains("reopened") {
            return ReviewEventType::Reopen;
        }
        if body.contains("requested review") {
            return ReviewEventType::ReviewerAssign;
        }
        if body.contains("assigned") {
            return ReviewEventType::Assign;
        }
        if body.contains("milestone") {
            return ReviewEventType::Milestone;
        }
        if body.contains("label") {
            return ReviewEventType::Label;
        }
    }
    if note.has_position {
        ReviewEventType::CodeComment
    } else {
        ReviewEventType::Comment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(body: &str) -> RemoteNote<'_> {
        RemoteNote { system: true, body, has_position: false }
    }

    #[test]
    fn maps_all_system_note_shapes() {
        let cases = [
            ("approved this merge request", ReviewEventType::Approve),
            ("unapproved this merge request", ReviewEventType::Unapprove),
            ("merged", ReviewEventType::Merge),
            ("closed", ReviewEventType::Close),
            ("reopened", ReviewEventType::Reopen),
            ("assigned to @alice", ReviewEventType::Assign),
            ("requested review from @bob", ReviewEventType::ReviewerAssign),
            ("added ~bug label", ReviewEventType::Label),
            ("changed milestone to v2", ReviewEventType::Milestone),
        ];
        for (body, expected) in cases {
            assert_eq!(classify_note(&system(body)), expected, "{body}");
        }
    }

    #[test]
    fn unapproved_wins_over_approved_substring() {
        assert_eq!(classify_note(&system("unapproved this merge request")), ReviewEventType::Unapprove);
    }

    #[test]
    fn diff_note_is_code_comment() {
        let note = RemoteNote { system: false, body: "nit: rename this", has_position: true };
        assert_eq!(classify_note(&note), ReviewEventType::CodeComment);
    }

    #[test]
    fn regular_note_is_comment() {
        let note = RemoteNote { system: false, body: "looks good to me", has_position: false };
        assert_eq!(classify_note(&note), ReviewEventType::Comment);
    }
}
