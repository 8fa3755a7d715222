//! Parameter words collected from a single line.

use crate::{
    config::{Axes, MAX_AXES, ParserConfig},
    status::Status,
};
use bitflags::bitflags;

bitflags! {
    /// Which words appeared on the line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct WordFlags: u16 {
        const X = 1 << 0;
        const Y = 1 << 1;
        const Z = 1 << 2;
        const A = 1 << 3;
        const B = 1 << 4;
        const C = 1 << 5;
        /// `D` and `Q` share a slot.
        const D = 1 << 6;
        const F = 1 << 7;
        const I = 1 << 8;
        const J = 1 << 9;
        const K = 1 << 10;
        const L = 1 << 11;
        const P = 1 << 12;
        const R = 1 << 13;
        const S = 1 << 14;
        const T = 1 << 15;

        const AXES = Self::X.bits() | Self::Y.bits() | Self::Z.bits()
            | Self::A.bits() | Self::B.bits() | Self::C.bits();
        const IJK = Self::I.bits() | Self::J.bits() | Self::K.bits();
        /// Words a `$J=` line may not carry.
        const JOG_INVALID = Self::IJK.bits() | Self::D.bits() | Self::L.bits()
            | Self::P.bits() | Self::R.bits() | Self::T.bits() | Self::S.bits();
    }
}

impl WordFlags {
    pub const Q: Self = Self::D;

    pub fn axis(index: usize) -> Self {
        Self::from_bits_truncate(1 << index)
    }

    pub fn offset(index: usize) -> Self {
        Self::from_bits_truncate(Self::I.bits() << index)
    }

    /// Axis word bits that exist on a machine with `count` axes.
    pub fn axes_up_to(count: usize) -> Self {
        Self::from_bits_truncate((1 << count.min(MAX_AXES)) - 1)
    }
}

/// Values of the parameter words on a line. A value is meaningful only
/// when its bit is set in [`LineWords::flags`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineWords {
    pub axes: Axes,
    pub ijk: [f64; 3],
    /// `D` or `Q`.
    pub d: f64,
    pub f: f64,
    pub p: f64,
    pub r: f64,
    pub s: f64,
    pub t: u8,
    pub l: u8,
    /// Tool-length offset index selected by `H`.
    pub h: Option<u8>,
    pub n: Option<u32>,
    pub flags: WordFlags,
}

impl LineWords {
    pub fn has(&self, flags: WordFlags) -> bool {
        self.flags.intersects(flags)
    }

    pub fn has_axes(&self) -> bool {
        self.has(WordFlags::AXES)
    }

    pub fn q(&self) -> f64 {
        self.d
    }

    fn mark(&mut self, flag: WordFlags) -> Result<(), Status> {
        if self.flags.contains(flag) {
            return Err(Status::WordRepeated);
        }
        self.flags |= flag;
        Ok(())
    }

    /// Stores a parameter word. `G`, `M` and `N` are handled by the line
    /// parser. Returns [`Status::UnusedWords`] for letters with no slot so
    /// extensions get a chance to claim them.
    pub fn set(&mut self, letter: char, value: f64, config: &ParserConfig) -> Result<(), Status> {
        if let Some(axis) = config.axis_letters().iter().position(|&l| l == letter) {
            self.mark(WordFlags::axis(axis))?;
            self.axes[axis] = value;
            return Ok(());
        }

        match letter {
            'I' | 'J' | 'K' => {
                let slot = (letter as u8 - b'I') as usize;
                self.mark(WordFlags::offset(slot))?;
                self.ijk[slot] = value;
            }
            'D' | 'Q' => {
                self.mark(WordFlags::D)?;
                self.d = value;
            }
            'F' => {
                self.mark(WordFlags::F)?;
                self.f = value;
            }
            'P' => {
                self.mark(WordFlags::P)?;
                self.p = value;
            }
            'R' => {
                self.mark(WordFlags::R)?;
                self.r = value;
            }
            'L' => {
                self.mark(WordFlags::L)?;
                self.l = integral(value)?;
            }
            'S' => {
                self.mark(WordFlags::S)?;
                if value < 0.0 {
                    return Err(Status::NegativeValue);
                }
                self.s = value;
            }
            'T' => {
                self.mark(WordFlags::T)?;
                self.t = integral(value)?;
            }
            'H' => {
                if self.h.is_some() {
                    return Err(Status::WordRepeated);
                }
                let index = integral(value)?;
                if index == 0 || index > config.tool_count {
                    return Err(Status::InvalidTool);
                }
                self.h = Some(index);
            }
            _ => return Err(Status::UnusedWords),
        }
        Ok(())
    }
}

/// Index-like words. Values past 255 saturate and fail the range checks
/// further down.
fn integral(value: f64) -> Result<u8, Status> {
    if value.fract() != 0.0 {
        return Err(Status::ValueNotInteger);
    }
    if value < 0.0 {
        return Err(Status::NegativeValue);
    }
    Ok(value.min(f64::from(u8::MAX)) as u8)
}
