//! Supported device models.
//!
//! Devices advertise a name made of a model code followed by a 12-character
//! hardware suffix, for example `DYNWRGB1A2B3C4D5E6F`. The code selects the
//! model, which fixes the device kind and, for lights, the channel layout.

use crate::types::DeviceKind;

/// Length of the hardware suffix appended to every advertised name.
pub const NAME_SUFFIX_LEN: usize = 12;

/// A named light channel and the id used on the wire.
pub type Channel = (&'static str, u8);

/// A supported device model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceModel {
    /// Marketing name.
    pub name: &'static str,
    pub kind: DeviceKind,
    /// Advertised model codes.
    pub codes: &'static [&'static str],
    /// Channel layout (empty for dosers). Several names may share an id.
    pub channels: &'static [Channel],
}

const RGB: &[Channel] = &[("red", 0), ("green", 1), ("blue", 2)];
const RGBW: &[Channel] = &[("red", 0), ("green", 1), ("blue", 2), ("white", 3)];
const WHITE: &[Channel] = &[("white", 0)];

/// Every model this crate knows how to drive.
pub const MODELS: &[DeviceModel] = &[
    DeviceModel {
        name: "Dosing Pump",
        kind: DeviceKind::Doser,
        codes: &["DYDOSE"],
        channels: &[],
    },
    DeviceModel {
        name: "WRGB II",
        kind: DeviceKind::Light,
        codes: &["DYNWRGB", "DYNW30", "DYNW45", "DYNW60", "DYNW90", "DYNW12P"],
        channels: RGB,
    },
    DeviceModel {
        name: "WRGB II Pro",
        kind: DeviceKind::Light,
        codes: &[
            "DYWPRO30", "DYWPRO45", "DYWPRO60", "DYWPRO80", "DYWPRO90", "DYWPR120",
        ],
        channels: RGBW,
    },
    DeviceModel {
        name: "Universal WRGB",
        kind: DeviceKind::Light,
        codes: &[
            "DYU550", "DYU600", "DYU700", "DYU800", "DYU920", "DYU1000", "DYU1200", "DYU1500",
        ],
        channels: RGBW,
    },
    DeviceModel {
        name: "A II",
        kind: DeviceKind::Light,
        codes: &["DYNA2", "DYNA2N"],
        channels: WHITE,
    },
    DeviceModel {
        name: "C II",
        kind: DeviceKind::Light,
        codes: &["DYNC2N"],
        channels: WHITE,
    },
    DeviceModel {
        name: "C II RGB",
        kind: DeviceKind::Light,
        codes: &["DYNCRGP"],
        channels: RGB,
    },
    DeviceModel {
        name: "Commander 1",
        kind: DeviceKind::Light,
        codes: &["DYCOM"],
        channels: &[("white", 0), ("red", 0), ("green", 1), ("blue", 2)],
    },
    DeviceModel {
        name: "Tiny Terrarium Egg",
        kind: DeviceKind::Light,
        codes: &["DYDD"],
        channels: &[("red", 0), ("green", 1)],
    },
];

impl DeviceModel {
    /// Look up a model by its exact code.
    #[must_use]
    pub fn from_code(code: &str) -> Option<&'static DeviceModel> {
        MODELS.iter().find(|m| m.codes.iter().any(|c| *c == code))
    }

    /// Look up a model from an advertised device name.
    ///
    /// ```
    /// use aquable_types::{DeviceKind, DeviceModel};
    ///
    /// let model = DeviceModel::from_device_name("DYDOSE0123456789AB").unwrap();
    /// assert_eq!(model.kind, DeviceKind::Doser);
    ///
    /// assert!(DeviceModel::from_device_name("DYDOSE").is_none());
    /// assert!(DeviceModel::from_device_name("Thermometer 12345").is_none());
    /// ```
    #[must_use]
    pub fn from_device_name(name: &str) -> Option<&'static DeviceModel> {
        let code_len = name.len().checked_sub(NAME_SUFFIX_LEN)?;
        Self::from_code(name.get(..code_len)?)
    }

    /// Distinct channel ids, ascending.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<u8> {
        let mut ids: Vec<u8> = self.channels.iter().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Number of independently addressable channels.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_ids().len()
    }

    /// Channel names keyed by id, first name wins when several share an id.
    #[must_use]
    pub fn channel_names(&self) -> Vec<(u8, &'static str)> {
        self.channel_ids()
            .into_iter()
            .filter_map(|id| {
                self.channels
                    .iter()
                    .find(|(_, cid)| *cid == id)
                    .map(|(name, _)| (id, *name))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUFFIX: &str = "A1B2C3D4E5F6";

    #[test]
    fn test_every_code_resolves() {
        for model in MODELS {
            for code in model.codes {
                let name = format!("{code}{SUFFIX}");
                let found = DeviceModel::from_device_name(&name).unwrap();
                assert_eq!(found.name, model.name);
            }
        }
    }

    #[test]
    fn test_codes_are_unique() {
        let mut all: Vec<&str> = MODELS.iter().flat_map(|m| m.codes.iter().copied()).collect();
        let before = all.len();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), before);
    }

    #[test]
    fn test_prefix_must_match_exactly() {
        // DYNW30 is a code, DYNW3 is not.
        assert!(DeviceModel::from_device_name(&format!("DYNW3{SUFFIX}")).is_none());
        assert!(DeviceModel::from_device_name("short").is_none());
    }

    #[test]
    fn test_commander_channel_ids() {
        let model = DeviceModel::from_code("DYCOM").unwrap();
        assert_eq!(model.channel_ids(), vec![0, 1, 2]);
        assert_eq!(model.channel_count(), 3);
        assert_eq!(
            model.channel_names(),
            vec![(0, "white"), (1, "green"), (2, "blue")]
        );
    }

    #[test]
    fn test_doser_has_no_channels() {
        let model = DeviceModel::from_code("DYDOSE").unwrap();
        assert_eq!(model.kind, DeviceKind::Doser);
        assert_eq!(model.channel_count(), 0);
    }
}
