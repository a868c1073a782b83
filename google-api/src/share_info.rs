//! Invitation text placed in the description of a calendar event.

use reqwest::Url;

/// Builds the description of a calendar event that points at a meeting.
pub trait DescriptionBuilder: Send + Sync {
    /// `location` is the meeting URL; `has_dial_in` says whether joining by phone is possible.
    fn build(&self, location: &str, has_dial_in: bool) -> String;
}

impl<F> DescriptionBuilder for F
where
    F: Fn(&str, bool) -> String + Send + Sync,
{
    fn build(&self, location: &str, has_dial_in: bool) -> String {
        self(location, has_dial_in)
    }
}

/// The standard invitation: a link to the meeting and, if available, where to find the
/// dial-in numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShareInfoText;

impl DescriptionBuilder for ShareInfoText {
    fn build(&self, location: &str, has_dial_in: bool) -> String {
        let mut text =
            format!("Click the following link to join the meeting from your computer: {location}");
        if !has_dial_in {
            return text;
        }
        match dial_in_info_url(location) {
            Some(url) => {
                text.push_str("\n\n=====\n\nJust want to dial in on your phone?\n\n");
                text.push_str(&format!("Call one of the numbers listed at {url}"));
            }
            None => tracing::debug!(location, "meeting URL names no room; leaving out dial-in"),
        }
        text
    }
}

/// The page with dial-in numbers and the PIN for the meeting at `location`.
///
/// The room is the last path segment of the meeting URL. Returns `None` if `location` is not
/// a URL or has no such segment.
pub fn dial_in_info_url(location: &str) -> Option<String> {
    let mut url = Url::parse(location).ok()?;
    let room = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .next_back()?
        .to_string();

    url.path_segments_mut()
        .ok()?
        .pop_if_empty()
        .pop()
        .push("static")
        .push("dialInInfo.html");
    url.set_fragment(None);
    // the segment is already percent-encoded
    url.set_query(Some(&format!("room={room}")));
    Some(url.into())
}
