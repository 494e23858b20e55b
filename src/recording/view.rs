use super::session::SessionState;
use crate::collection::kind::GeometryKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonFlags {
    pub hidden: bool,
    pub enabled: bool,
}

const HIDDEN: ButtonFlags = ButtonFlags {
    hidden: true,
    enabled: false,
};
const DISABLED: ButtonFlags = ButtonFlags {
    hidden: false,
    enabled: false,
};
const ENABLED: ButtonFlags = ButtonFlags {
    hidden: false,
    enabled: true,
};

/// `next` captures a line end or a polygon vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewFlags {
    pub start: ButtonFlags,
    pub next: ButtonFlags,
    pub close: ButtonFlags,
    pub cancel: ButtonFlags,
    pub save_enabled: bool,
    pub follow_user: bool,
}

pub fn view_flags(geometry_kind: GeometryKind, state: SessionState, num_fixes: usize) -> ViewFlags {
    let next_button = |flags: ButtonFlags| match geometry_kind {
        GeometryKind::Point => HIDDEN,
        GeometryKind::LineString | GeometryKind::Polygon => flags,
    };
    let close_button = |flags: ButtonFlags| match geometry_kind {
        GeometryKind::Polygon => flags,
        GeometryKind::Point | GeometryKind::LineString => HIDDEN,
    };
    match state {
        SessionState::Idle | SessionState::Committed | SessionState::Cancelled => ViewFlags {
            start: ENABLED,
            next: HIDDEN,
            close: HIDDEN,
            cancel: HIDDEN,
            save_enabled: false,
            follow_user: true,
        },
        SessionState::Capturing => ViewFlags {
            start: DISABLED,
            next: next_button(ENABLED),
            close: close_button(if num_fixes >= 3 { ENABLED } else { DISABLED }),
            cancel: ENABLED,
            save_enabled: false,
            follow_user: true,
        },
        SessionState::Ready => ViewFlags {
            start: DISABLED,
            next: next_button(DISABLED),
            close: close_button(DISABLED),
            cancel: ENABLED,
            save_enabled: true,
            follow_user: false,
        },
    }
}
