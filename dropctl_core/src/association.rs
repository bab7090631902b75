//! Channel/droplet association by pixel overlap.

use crate::channel::Channel;
use crate::vision::Droplet;

/// Number of droplet pixels that fall inside the channel mask.
pub fn overlap(channel: &Channel, droplet: &Droplet) -> usize {
    let (w, h) = channel.mask.dimensions();
    droplet
        .blob
        .pixels
        .iter()
        .filter(|&&(x, y)| x < w && y < h && channel.mask.get_pixel(x, y)[0] != 0)
        .count()
}

/// For each channel, the droplet with the largest strictly positive
/// overlap. Ties go to the earliest droplet.
pub fn occupants(channels: &[Channel], droplets: &[Droplet]) -> Vec<Option<usize>> {
    channels
        .iter()
        .map(|ch| {
            let mut best: Option<(usize, usize)> = None;
            for (j, d) in droplets.iter().enumerate() {
                let o = overlap(ch, d);
                if o > best.map_or(0, |(_, bo)| bo) {
                    best = Some((j, o));
                }
            }
            best.map(|(j, _)| j)
        })
        .collect()
}

/// Record each channel's occupying droplet for this cycle.
pub fn associate(channels: &mut [Channel], droplets: &[Droplet]) {
    let occ = occupants(channels, droplets);
    for (ch, o) in channels.iter_mut().zip(occ) {
        ch.occupant = o;
    }
}
