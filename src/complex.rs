use std::{
    fmt::{Debug, Display, LowerExp},
    ops::{Add, AddAssign, Div, Mul, MulAssign, Neg, Sub, SubAssign},
};

use approx::{AbsDiffEq, RelativeEq, UlpsEq};
use duplicate::duplicate;
use num::Float;
use serde::{Deserialize, Serialize};

use crate::contraction::IsZero;

/// A complex number laid out as two consecutive reals, matching C's `double _Complex`.
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Complex<T> {
    pub re: T,
    pub im: T,
}

impl<T: AbsDiffEq> AbsDiffEq for Complex<T>
where
    T::Epsilon: Copy,
{
    type Epsilon = T::Epsilon;

    fn default_epsilon() -> T::Epsilon {
        T::default_epsilon()
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: T::Epsilon) -> bool {
        T::abs_diff_eq(&self.re, &other.re, epsilon) && T::abs_diff_eq(&self.im, &other.im, epsilon)
    }
}

impl<T: RelativeEq> RelativeEq for Complex<T>
where
    T::Epsilon: Copy,
{
    fn default_max_relative() -> T::Epsilon {
        T::default_max_relative()
    }

    fn relative_eq(&self, other: &Self, epsilon: T::Epsilon, max_relative: T::Epsilon) -> bool {
        T::relative_eq(&self.re, &other.re, epsilon, max_relative)
            && T::relative_eq(&self.im, &other.im, epsilon, max_relative)
    }
}

impl<T: UlpsEq> UlpsEq for Complex<T>
where
    T::Epsilon: Copy,
{
    fn default_max_ulps() -> u32 {
        T::default_max_ulps()
    }

    fn ulps_eq(&self, other: &Self, epsilon: T::Epsilon, max_ulps: u32) -> bool {
        T::ulps_eq(&self.re, &other.re, epsilon, max_ulps)
            && T::ulps_eq(&self.im, &other.im, epsilon, max_ulps)
    }
}

impl<T> Complex<T> {
    #[inline]
    pub fn new(re: T, im: T) -> Complex<T> {
        Complex { re, im }
    }

    pub fn map<U>(self, f: impl Fn(T) -> U) -> Complex<U> {
        Complex {
            re: f(self.re),
            im: f(self.im),
        }
    }
}

impl<T: Float> Complex<T> {
    pub fn new_re(re: T) -> Complex<T> {
        Complex { re, im: T::zero() }
    }

    pub fn zero() -> Complex<T> {
        Complex::new(T::zero(), T::zero())
    }

    pub fn one() -> Complex<T> {
        Complex::new(T::one(), T::zero())
    }

    #[inline]
    pub fn i() -> Complex<T> {
        Complex::new(T::zero(), T::one())
    }

    pub fn conj(&self) -> Complex<T> {
        Complex::new(self.re, -self.im)
    }

    #[inline]
    pub fn norm_squared(&self) -> T {
        self.re * self.re + self.im * self.im
    }

    pub fn norm(&self) -> T {
        self.re.hypot(self.im)
    }

    #[inline]
    pub fn arg(&self) -> T {
        self.im.atan2(self.re)
    }

    pub fn inv(&self) -> Self {
        let n = self.norm_squared();
        Complex::new(self.re / n, -self.im / n)
    }

    #[inline]
    pub fn from_polar_coordinates(r: T, phi: T) -> Complex<T> {
        Complex::new(r * phi.cos(), r * phi.sin())
    }

    pub fn exp(&self) -> Self {
        Complex::from_polar_coordinates(self.re.exp(), self.im)
    }

    /// Principal branch of the logarithm.
    pub fn ln(&self) -> Self {
        Complex::new(self.norm().ln(), self.arg())
    }

    pub fn sqrt(&self) -> Self {
        let r = self.norm().sqrt();
        let phi = self.arg() / (T::one() + T::one());
        Complex::from_polar_coordinates(r, phi)
    }

    pub fn sin(&self) -> Self {
        Complex::new(
            self.re.sin() * self.im.cosh(),
            self.re.cos() * self.im.sinh(),
        )
    }

    pub fn cos(&self) -> Self {
        Complex::new(
            self.re.cos() * self.im.cosh(),
            -self.re.sin() * self.im.sinh(),
        )
    }

    /// Integer power by binary exponentiation, the same scheme compiled evaluators use.
    pub fn powi(&self, n: i64) -> Self {
        let mut base = *self;
        let mut e = n.unsigned_abs();
        let mut result = Complex::one();
        while e > 0 {
            if e & 1 == 1 {
                result *= base;
            }
            base *= base;
            e >>= 1;
        }
        if n < 0 {
            result.inv()
        } else {
            result
        }
    }

    pub fn powc(&self, e: &Self) -> Self {
        if self.re.is_zero() && self.im.is_zero() {
            return if e.re.is_zero() && e.im.is_zero() {
                Complex::one()
            } else {
                Complex::zero()
            };
        }
        (self.ln() * *e).exp()
    }

    pub fn is_finite(&self) -> bool {
        self.re.is_finite() && self.im.is_finite()
    }
}

impl<T: Float> IsZero for Complex<T> {
    fn is_zero(&self) -> bool {
        self.re.is_zero() && self.im.is_zero()
    }
}

impl<T: Float> From<T> for Complex<T> {
    fn from(re: T) -> Self {
        Complex::new_re(re)
    }
}

duplicate! {
    [
        lhs_type rhs_type;
        [Complex<T>] [Complex<T>];
        [&Complex<T>] [&Complex<T>];
        [Complex<T>] [&Complex<T>];
        [&Complex<T>] [Complex<T>];
    ]
    impl<T: Float> Add<rhs_type> for lhs_type {
        type Output = Complex<T>;

        #[inline]
        fn add(self, rhs: rhs_type) -> Complex<T> {
            Complex::new(self.re + rhs.re, self.im + rhs.im)
        }
    }

    impl<T: Float> Sub<rhs_type> for lhs_type {
        type Output = Complex<T>;

        #[inline]
        fn sub(self, rhs: rhs_type) -> Complex<T> {
            Complex::new(self.re - rhs.re, self.im - rhs.im)
        }
    }

    impl<T: Float> Mul<rhs_type> for lhs_type {
        type Output = Complex<T>;

        #[inline]
        fn mul(self, rhs: rhs_type) -> Complex<T> {
            Complex::new(
                self.re * rhs.re - self.im * rhs.im,
                self.re * rhs.im + self.im * rhs.re,
            )
        }
    }

    impl<T: Float> Div<rhs_type> for lhs_type {
        type Output = Complex<T>;

        #[inline]
        fn div(self, rhs: rhs_type) -> Complex<T> {
            self * rhs.inv()
        }
    }
}

impl<T: Float> Mul<T> for Complex<T> {
    type Output = Complex<T>;

    #[inline]
    fn mul(self, rhs: T) -> Complex<T> {
        Complex::new(self.re * rhs, self.im * rhs)
    }
}

impl<T: Float> AddAssign for Complex<T> {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl<T: Float> SubAssign for Complex<T> {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl<T: Float> MulAssign for Complex<T> {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}

impl<T: Float> Neg for Complex<T> {
    type Output = Complex<T>;

    fn neg(self) -> Complex<T> {
        Complex::new(-self.re, -self.im)
    }
}

impl<T: Float> std::iter::Sum for Complex<T> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Complex::zero(), |a, b| a + b)
    }
}

impl<T: Display> Display for Complex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("({}+{}i)", self.re, self.im))
    }
}

impl<T: Debug> Debug for Complex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("({:?}+{:?}i)", self.re, self.im))
    }
}

impl<T: LowerExp> LowerExp for Complex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("({:e}+{:e}i)", self.re, self.im))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn elementary_functions() {
        let z = Complex::new(0.3, -1.2);
        assert_relative_eq!(z.ln().exp(), z, max_relative = 1e-14);
        assert_relative_eq!(z.sqrt() * z.sqrt(), z, max_relative = 1e-14);
        let s = z.sin();
        let c = z.cos();
        assert_relative_eq!(s * s + c * c, Complex::one(), max_relative = 1e-14);
        assert_relative_eq!(
            Complex::i().powi(3),
            Complex::new(0., -1.),
            epsilon = 1e-15
        );
    }

    #[test]
    fn powers() {
        let z = Complex::new(1.5, 0.5);
        assert_relative_eq!(z.powi(-2) * z.powi(2), Complex::one(), max_relative = 1e-14);
        assert_relative_eq!(
            z.powc(&Complex::new(2., 0.)),
            z * z,
            max_relative = 1e-13
        );
        assert_eq!(Complex::<f64>::zero().powc(&Complex::zero()), Complex::one());
    }

    #[test]
    fn c_layout() {
        assert_eq!(
            std::mem::size_of::<Complex<f64>>(),
            2 * std::mem::size_of::<f64>()
        );
    }
}
