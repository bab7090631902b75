//! Channel activation arbiter.
//!
//! Decides each cycle which channels are under closed-loop control and
//! whether they follow a marker or a droplet neck. The activation set is
//! either empty or exactly the layout of one usable controller in the bank;
//! requests that would break this are refused without error.

use crate::bank::ControllerBank;
use crate::channel::{Channel, Follow};
use crate::config::ChannelRequests;
use crate::tracker::Marker;
use crate::types::Point2;
use crate::vision::Droplet;

/// Activated channel indices in activation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationSet(Vec<usize>);

impl ActivationSet {
    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    pub fn contains(&self, channel: usize) -> bool {
        self.0.contains(&channel)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The set with `channel` appended.
    pub fn with(&self, channel: usize) -> Vec<usize> {
        let mut v = self.0.clone();
        v.push(channel);
        v
    }

    fn remove(&mut self, channel: usize) -> bool {
        let before = self.0.len();
        self.0.retain(|&c| c != channel);
        self.0.len() != before
    }

    fn clear(&mut self) {
        self.0.clear();
    }
}

/// Pending estimator resets, consumed by the next control step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// A channel joined or swapped its marker: reset covariances.
    pub selecting: bool,
    /// A channel left: reset covariances and every carried vector.
    pub releasing: bool,
}

impl Transition {
    pub fn any(self) -> bool {
        self.selecting || self.releasing
    }
}

/// This cycle's features as seen by the arbiter.
#[derive(Debug, Clone, Copy)]
pub struct Observations<'a> {
    pub markers: &'a [Marker],
    /// Markers of the previous cycle; `Follow::Marker` indices point here
    /// until retention renews them.
    pub previous_markers: &'a [Marker],
    pub droplets: &'a [Droplet],
}

/// Operator input in camera coordinates.
#[derive(Debug, Clone, Copy)]
pub struct ArbiterInput<'a> {
    pub requests: &'a ChannelRequests,
    pub left_click: Option<Point2>,
    pub right_click: Option<Point2>,
    /// Horizontal/vertical exclusion margins for auto-catch.
    pub auto_margin: (i32, i32),
}

#[derive(Debug, Clone, Default)]
pub struct Arbiter {
    active: ActivationSet,
    pub transition: Transition,
}

impl Arbiter {
    pub fn active(&self) -> &ActivationSet {
        &self.active
    }

    /// Drop every activation without flagging a transition.
    pub fn reset(&mut self, channels: &mut [Channel]) {
        self.active.clear();
        self.transition = Transition::default();
        for ch in channels {
            ch.reset();
        }
    }

    /// Run one arbitration pass. `channels[i]` must be channel `i`, with
    /// `occupant` already associated for this cycle.
    pub fn update(
        &mut self,
        channels: &mut [Channel],
        obs: &Observations<'_>,
        input: &ArbiterInput<'_>,
        bank: &ControllerBank,
    ) {
        self.retain(channels, obs, input.requests, bank);
        if let Some(p) = input.left_click {
            self.left_click(channels, obs.markers, p, bank);
        }
        if let Some(p) = input.right_click {
            self.right_click(channels, obs.markers, p, bank);
        }
        self.auto_activate(channels, obs, input, bank);
    }

    /// Renew marker indices by identity and keep necks alive; release the
    /// channels whose feature was lost.
    fn retain(
        &mut self,
        channels: &mut [Channel],
        obs: &Observations<'_>,
        requests: &ChannelRequests,
        bank: &ControllerBank,
    ) {
        for i in 0..channels.len() {
            let next = match channels[i].follow {
                Follow::Idle => continue,
                Follow::Marker(k) => obs
                    .previous_markers
                    .get(k)
                    .and_then(|old| obs.markers.iter().position(|m| m.identity == old.identity))
                    .filter(|&j| channels[i].holds_marker(&obs.markers[j], 0, 0))
                    .map(Follow::Marker),
                Follow::Neck(_) => channels[i]
                    .occupant
                    .filter(|&o| requests.use_neck(i) && obs.droplets.get(o).is_some_and(Droplet::has_neck))
                    .map(Follow::Neck),
            };
            match next {
                Some(f) => channels[i].follow = f,
                None => self.release(channels, i, bank),
            }
        }
    }

    fn left_click(&mut self, channels: &mut [Channel], markers: &[Marker], p: Point2, bank: &ControllerBank) {
        for (mi, marker) in markers.iter().enumerate() {
            if !marker.rect.contains(p) {
                continue;
            }
            let Some(ci) = channels.iter().position(|c| c.holds_marker(marker, 0, 0)) else {
                continue;
            };
            match channels[ci].follow {
                Follow::Marker(k) if k != mi => {
                    tracing::debug!(channel = ci, marker = marker.identity, "measuring marker swapped");
                    channels[ci].follow = Follow::Marker(mi);
                    self.transition.selecting = true;
                }
                Follow::Idle => {
                    self.try_activate(channels, ci, Follow::Marker(mi), bank);
                }
                _ => {}
            }
        }
    }

    fn right_click(&mut self, channels: &mut [Channel], markers: &[Marker], p: Point2, bank: &ControllerBank) {
        for (mi, marker) in markers.iter().enumerate() {
            if !marker.rect.contains(p) {
                continue;
            }
            if let Some(ci) = channels.iter().position(|c| c.measuring_marker() == Some(mi)) {
                self.release(channels, ci, bank);
            }
        }
    }

    /// Auto-catch markers first, then fall back to necks.
    fn auto_activate(
        &mut self,
        channels: &mut [Channel],
        obs: &Observations<'_>,
        input: &ArbiterInput<'_>,
        bank: &ControllerBank,
    ) {
        let (mx, my) = input.auto_margin;
        for i in 0..channels.len() {
            if input.requests.auto_catch(i) && !channels[i].is_active() {
                let caught = obs.markers.iter().position(|m| channels[i].holds_marker(m, mx, my));
                if let Some(j) = caught {
                    self.try_activate(channels, i, Follow::Marker(j), bank);
                }
            }
            if input.requests.use_neck(i) && !channels[i].is_active() {
                let necked = channels[i]
                    .occupant
                    .filter(|&o| obs.droplets.get(o).is_some_and(Droplet::has_neck));
                if let Some(o) = necked {
                    self.try_activate(channels, i, Follow::Neck(o), bank);
                }
            }
        }
    }

    fn try_activate(&mut self, channels: &mut [Channel], i: usize, follow: Follow, bank: &ControllerBank) -> bool {
        let candidate = self.active.with(i);
        if !bank.supports(&candidate) {
            tracing::trace!(channel = i, set = ?candidate, "activation refused, no controller");
            return false;
        }
        self.active = ActivationSet(candidate);
        channels[i].follow = follow;
        self.transition.selecting = true;
        tracing::debug!(channel = i, ?follow, set = ?self.active.as_slice(), "channel activated");
        true
    }

    fn release(&mut self, channels: &mut [Channel], i: usize, bank: &ControllerBank) {
        channels[i].follow = Follow::Idle;
        if self.active.remove(i) {
            self.transition.releasing = true;
            tracing::debug!(channel = i, set = ?self.active.as_slice(), "channel released");
        }
        while !bank.supports(self.active.as_slice()) {
            let Some(last) = self.active.0.pop() else {
                break;
            };
            if let Some(ch) = channels.get_mut(last) {
                ch.follow = Follow::Idle;
            }
            tracing::warn!(channel = last, "no controller for remaining channels, releasing");
        }
    }
}
