//! Canonical endpoint paths.
//!
//! Every synthetic file lives under an endpoint directory. The endpoint is identified by the
//! subpath starting at the last recognized anchor and ending after the endpoint name:
//!
//! ```text
//! /sync/cv/1/bgr/cve/edge-detect/process.fire  ->  /cv/1/bgr/cve/edge-detect
//! /cnc/tinyg/gcode.fire                        ->  /cnc/tinyg
//! /cv/1/camera.jpg                             ->  "" (not an endpoint)
//! ```

const CV_ANCHOR: &str = "/cv/";
const CVE_SEGMENT: &str = "/cve/";
const CNC_ANCHOR: &str = "/cnc/";

/// Profile name that selects the gray decoded frame instead of the color one.
pub const GRAY_PROFILE: &str = "gray";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Vision endpoint (CVE)
    Vision,
    /// Device endpoint (DCE)
    Device,
}

/// Returns the canonical endpoint key for `path`, or an empty string if `path` does not
/// address an endpoint.
///
/// # Examples
/// ```
/// use firefuse_structures::paths::canonicalize;
///
/// assert_eq!(
///     canonicalize("/cv/1/bgr/cve/edge-detect/process.fire"),
///     "/cv/1/bgr/cve/edge-detect"
/// );
/// assert_eq!(canonicalize("/cnc/tinyg/gcode.fire"), "/cnc/tinyg");
/// assert_eq!(canonicalize("/cv/1/camera.jpg"), "");
/// ```
pub fn canonicalize(path: &str) -> String {
    match locate(path) {
        Some((_, start, end)) => path[start..end].to_string(),
        None => String::new(),
    }
}

/// Kind of endpoint `path` resolves to, if any.
pub fn endpoint_kind(path: &str) -> Option<EndpointKind> {
    locate(path).map(|(kind, _, _)| kind)
}

/// The part of `path` after its canonical endpoint key, without the leading slash.
/// `None` when `path` is not under an endpoint.
pub fn endpoint_relative(path: &str) -> Option<&str> {
    let (_, _, end) = locate(path)?;
    Some(path[end..].trim_start_matches('/'))
}

/// Last segment of a canonical key (`edge-detect` for `/cv/1/bgr/cve/edge-detect`).
pub fn endpoint_name(canonical: &str) -> &str {
    canonical.rsplit('/').next().unwrap_or("")
}

/// Profile segment of a vision key: `/cv/<camera>/<profile>/cve/<name>`.
pub fn camera_profile(canonical: &str) -> Option<&str> {
    let rest = canonical.strip_prefix(CV_ANCHOR)?;
    let segments: Vec<&str> = rest.split('/').collect();
    match segments.as_slice() {
        [_camera, profile, "cve", _name] => Some(*profile),
        _ => None,
    }
}

/// Color unless the endpoint sits under the gray profile.
pub fn is_color_profile(canonical: &str) -> bool {
    camera_profile(canonical) != Some(GRAY_PROFILE)
}

/// (kind, start, end) of the endpoint key whose anchor appears last in `path`.
fn locate(path: &str) -> Option<(EndpointKind, usize, usize)> {
    let vision = locate_vision(path).map(|(s, e)| (EndpointKind::Vision, s, e));
    let device = locate_device(path).map(|(s, e)| (EndpointKind::Device, s, e));
    match (vision, device) {
        (Some(v), Some(d)) => Some(if v.1 >= d.1 { v } else { d }),
        (v, d) => v.or(d),
    }
}

fn locate_vision(path: &str) -> Option<(usize, usize)> {
    let cve = path.rfind(CVE_SEGMENT)?;
    let end = segment_end(path, cve + CVE_SEGMENT.len())?;
    let start = path[..=cve].rfind(CV_ANCHOR)?;
    Some((start, end))
}

fn locate_device(path: &str) -> Option<(usize, usize)> {
    let start = path.rfind(CNC_ANCHOR)?;
    let end = segment_end(path, start + CNC_ANCHOR.len())?;
    Some((start, end))
}

/// End of the non-empty segment beginning at `from`.
fn segment_end(path: &str, from: usize) -> Option<usize> {
    let end = path[from..].find('/').map_or(path.len(), |i| from + i);
    (end > from).then_some(end)
}
