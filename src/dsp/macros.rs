//! Macros: derived modulation sources
//!
//! A macro shapes any controller (or another macro) into a new control
//! signal:
//!
//! ```text
//! output = min + amount * distort(distortion, randomize(randomness, input)) * (max - min)
//! ```
//!
//! Macros are updated once per block in a fixed index order; a macro whose
//! input is fed from a later macro therefore reads the value of the
//! previous block, which breaks cyclic dependencies without recursion.

use crate::dsp::param::FloatParamB;
use crate::math;
use crate::Number;

pub const MACROS: usize = 10;

pub struct Macro {
    pub input: FloatParamB,
    pub min: FloatParamB,
    pub max: FloatParamB,
    pub amount: FloatParamB,
    pub distortion: FloatParamB,
    pub randomness: FloatParamB,
    value: Number,
    change_index: i32,
    input_change_index: i32,
    min_change_index: i32,
    max_change_index: i32,
    amount_change_index: i32,
    distortion_change_index: i32,
    randomness_change_index: i32,
}

impl Default for Macro {
    fn default() -> Self {
        Self::new()
    }
}

impl Macro {
    pub fn new() -> Self {
        let mut this = Self {
            input: FloatParamB::new(0.0, 1.0, 0.0),
            min: FloatParamB::new(0.0, 1.0, 0.0),
            max: FloatParamB::new(0.0, 1.0, 1.0),
            amount: FloatParamB::new(0.0, 1.0, 1.0),
            distortion: FloatParamB::new(0.0, 1.0, 0.0),
            randomness: FloatParamB::new(0.0, 1.0, 0.0),
            value: 0.0,
            change_index: 0,
            input_change_index: -1,
            min_change_index: -1,
            max_change_index: -1,
            amount_change_index: -1,
            distortion_change_index: -1,
            randomness_change_index: -1,
        };

        this.update();
        this
    }

    /// Recompute the output if any of the source parameters changed since
    /// the previous update.
    pub fn update(&mut self) {
        if !self.refresh_change_indices() {
            return;
        }

        let shaped = math::distort(
            self.distortion.get_value(),
            math::randomize(self.randomness.get_value(), self.input.get_value()),
        );

        let min = self.min.get_value();
        let max = self.max.get_value();
        let value = (min + self.amount.get_value() * shaped * (max - min)).clamp(0.0, 1.0);

        if value != self.value {
            self.value = value;
            self.change_index = (self.change_index + 1) & 0x7fffffff;
        }
    }

    pub fn get_value(&self) -> Number {
        self.value
    }

    pub fn get_change_index(&self) -> i32 {
        self.change_index
    }

    pub fn reset(&mut self) {
        self.input.reset();
        self.min.reset();
        self.max.reset();
        self.amount.reset();
        self.distortion.reset();
        self.randomness.reset();
        self.update();
    }

    fn refresh_change_indices(&mut self) -> bool {
        let mut changed = false;

        for (param, cached) in [
            (&self.input, &mut self.input_change_index),
            (&self.min, &mut self.min_change_index),
            (&self.max, &mut self.max_change_index),
            (&self.amount, &mut self.amount_change_index),
            (&self.distortion, &mut self.distortion_change_index),
            (&self.randomness, &mut self.randomness_change_index),
        ] {
            let current = param.get_change_index();

            if current != *cached {
                *cached = current;
                changed = true;
            }
        }

        changed
    }
}
