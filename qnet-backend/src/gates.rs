//! Gate definitions as 2x2 and 4x4 complex matrices.

use std::{
    f64::consts::{FRAC_1_SQRT_2, FRAC_PI_4},
    fmt,
    ops::{Add, Mul, Neg, Sub},
};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const ZERO: Complex = Complex { re: 0.0, im: 0.0 };
    pub const ONE: Complex = Complex { re: 1.0, im: 0.0 };
    pub const I: Complex = Complex { re: 0.0, im: 1.0 };

    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub const fn real(re: f64) -> Self {
        Self { re, im: 0.0 }
    }

    /// e^{iθ}
    pub fn from_phase(theta: f64) -> Self {
        Self::new(theta.cos(), theta.sin())
    }

    pub fn conj(self) -> Self {
        Self::new(self.re, -self.im)
    }

    pub fn norm_sqr(self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    pub fn scale(self, factor: f64) -> Self {
        Self::new(self.re * factor, self.im * factor)
    }

    pub fn approx_eq(self, other: Complex, tolerance: f64) -> bool {
        (self.re - other.re).abs() <= tolerance && (self.im - other.im).abs() <= tolerance
    }
}

impl Add for Complex {
    type Output = Complex;

    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Complex;

    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Complex;

    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

impl Neg for Complex {
    type Output = Complex;

    fn neg(self) -> Complex {
        Complex::new(-self.re, -self.im)
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.im < 0.0 {
            write!(f, "{:.4}-{:.4}i", self.re, -self.im)
        } else {
            write!(f, "{:.4}+{:.4}i", self.re, self.im)
        }
    }
}

pub type Matrix2 = [[Complex; 2]; 2];
pub type Matrix4 = [[Complex; 4]; 4];
/// Reduced single-qubit density operator, row-major.
pub type DensityMatrix = Matrix2;

#[derive(Clone, Debug, PartialEq)]
pub enum SingleQubitGate {
    I,
    X,
    Y,
    Z,
    H,
    T,
    Rx(f64),
    Ry(f64),
    Rz(f64),
    Custom(Matrix2),
}

impl SingleQubitGate {
    pub fn matrix(&self) -> Matrix2 {
        let zero = Complex::ZERO;
        let one = Complex::ONE;
        match self {
            SingleQubitGate::I => [[one, zero], [zero, one]],
            SingleQubitGate::X => [[zero, one], [one, zero]],
            SingleQubitGate::Y => [[zero, -Complex::I], [Complex::I, zero]],
            SingleQubitGate::Z => [[one, zero], [zero, -one]],
            SingleQubitGate::H => {
                let h = Complex::real(FRAC_1_SQRT_2);
                [[h, h], [h, -h]]
            }
            SingleQubitGate::T => [[one, zero], [zero, Complex::from_phase(FRAC_PI_4)]],
            SingleQubitGate::Rx(theta) => {
                let c = Complex::real((theta / 2.0).cos());
                let s = Complex::new(0.0, -(theta / 2.0).sin());
                [[c, s], [s, c]]
            }
            SingleQubitGate::Ry(theta) => {
                let c = Complex::real((theta / 2.0).cos());
                let s = Complex::real((theta / 2.0).sin());
                [[c, -s], [s, c]]
            }
            SingleQubitGate::Rz(theta) => [
                [Complex::from_phase(-theta / 2.0), zero],
                [zero, Complex::from_phase(theta / 2.0)],
            ],
            SingleQubitGate::Custom(matrix) => *matrix,
        }
    }
}

/// Two-qubit gates in the |control target⟩ basis ordering 00, 01, 10, 11.
#[derive(Clone, Debug, PartialEq)]
pub enum TwoQubitGate {
    Cnot,
    Cphase,
    Custom(Matrix4),
}

impl TwoQubitGate {
    pub fn matrix(&self) -> Matrix4 {
        match self {
            TwoQubitGate::Cnot => permutation([0, 1, 3, 2]),
            TwoQubitGate::Cphase => {
                let mut matrix = permutation([0, 1, 2, 3]);
                matrix[3][3] = -Complex::ONE;
                matrix
            }
            TwoQubitGate::Custom(matrix) => *matrix,
        }
    }

    /// Lifts a single-qubit gate into a gate controlled by the first qubit.
    pub fn controlled(gate: &SingleQubitGate) -> Self {
        let inner = gate.matrix();
        let mut matrix = permutation([0, 1, 2, 3]);
        for row in 0..2 {
            for col in 0..2 {
                matrix[2 + row][2 + col] = inner[row][col];
            }
        }
        TwoQubitGate::Custom(matrix)
    }
}

fn permutation(rows: [usize; 4]) -> Matrix4 {
    let mut matrix = [[Complex::ZERO; 4]; 4];
    for (row, col) in rows.into_iter().enumerate() {
        matrix[row][col] = Complex::ONE;
    }
    matrix
}
