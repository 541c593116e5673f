//! Arbitrary precision unsigned integers, sized for RSA.
//!
//! A [`Bigint`] is an owned value. Arithmetic consumes its operands and
//! returns a fresh result, so intermediate values die as soon as they are
//! used; callers that still need an operand `clone()` it first. Component
//! buffers come from a small per-thread pool and are zeroed before they go
//! back to it.
//!
//! Modular arithmetic goes through a [`BiCtx`], which holds up to three
//! standing moduli (the RSA modulus and the two CRT primes) together with
//! whatever precomputation the selected [`Reduction`] needs.

use core::cmp::Ordering;
use core::fmt;
use std::cell::RefCell;

use crate::error::Error;

pub type Comp = u32;
type LongComp = u64;

const COMP_BITS: u32 = Comp::BITS;
const COMP_BYTES: usize = 4;
const COMP_RADIX: LongComp = 1 << COMP_BITS;

/// Operands at least this many components long multiply by Karatsuba.
const KARATSUBA_THRESHOLD: usize = 24;

/// Upper bound on the number of idle buffers kept per thread.
const POOL_LIMIT: usize = 64;

thread_local! {
    static POOL: RefCell<Vec<Vec<Comp>>> = const { RefCell::new(Vec::new()) };
}

fn alloc_comps(len: usize) -> Vec<Comp> {
    let mut buf = POOL
        .try_with(|pool| pool.borrow_mut().pop())
        .ok()
        .flatten()
        .unwrap_or_default();
    buf.clear();
    buf.resize(len, 0);
    buf
}

fn recycle(mut buf: Vec<Comp>) {
    wipe_comps(&mut buf);
    buf.clear();
    if buf.capacity() == 0 {
        return;
    }
    let _ = POOL.try_with(move |pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < POOL_LIMIT {
            pool.push(buf);
        }
    });
}

fn wipe_comps(buf: &mut [Comp]) {
    for comp in buf.iter_mut() {
        // SAFETY: `comp` is a valid, aligned, exclusive reference.
        unsafe { core::ptr::write_volatile(comp, 0) };
    }
}

/// Number of idle buffers in this thread's pool.
#[cfg(test)]
fn pooled_buffers() -> usize {
    POOL.with(|pool| pool.borrow().len())
}

pub struct Bigint {
    /// Little-endian components. Never empty; no high zero components
    /// except for the value zero itself.
    comps: Vec<Comp>,
}

impl Bigint {
    fn from_vec(comps: Vec<Comp>) -> Self {
        let mut bi = Self { comps };
        if bi.comps.is_empty() {
            bi.comps.push(0);
        }
        bi.trim();
        bi
    }

    fn from_slice(comps: &[Comp]) -> Self {
        let mut buf = alloc_comps(comps.len());
        buf.copy_from_slice(comps);
        Self::from_vec(buf)
    }

    pub fn from_int(value: Comp) -> Self {
        let mut buf = alloc_comps(1);
        buf[0] = value;
        Self { comps: buf }
    }

    pub fn zero() -> Self {
        Self::from_int(0)
    }

    /// `2^(32 * n)`.
    fn comp_power(n: usize) -> Self {
        let mut buf = alloc_comps(n + 1);
        buf[n] = 1;
        Self { comps: buf }
    }

    /// Reads a big-endian unsigned integer.
    pub fn import(data: &[u8]) -> Self {
        let mut buf = alloc_comps(data.len().div_ceil(COMP_BYTES).max(1));
        for (i, byte) in data.iter().rev().enumerate() {
            buf[i / COMP_BYTES] |= Comp::from(*byte) << (8 * (i % COMP_BYTES));
        }
        Self::from_vec(buf)
    }

    /// Writes the value big-endian, left-padded with zeroes to fill `out`.
    pub fn export(&self, out: &mut [u8]) -> Result<(), Error> {
        let needed = self.byte_len();
        if needed > out.len() {
            return Err(Error::bad_data("integer does not fit output"));
        }
        out.fill(0);
        let end = out.len();
        for i in 0..needed {
            out[end - 1 - i] = (self.comps[i / COMP_BYTES] >> (8 * (i % COMP_BYTES))) as u8;
        }
        Ok(())
    }

    pub fn to_bytes(&self, len: usize) -> Result<Vec<u8>, Error> {
        let mut out = vec![0u8; len];
        self.export(&mut out)?;
        Ok(out)
    }

    pub fn is_zero(&self) -> bool {
        self.comps.len() == 1 && self.comps[0] == 0
    }

    pub fn is_odd(&self) -> bool {
        self.comps[0] & 1 == 1
    }

    pub fn bit_len(&self) -> usize {
        let top = self.comps[self.comps.len() - 1];
        (self.comps.len() - 1) * COMP_BITS as usize + (COMP_BITS - top.leading_zeros()) as usize
    }

    pub fn byte_len(&self) -> usize {
        self.bit_len().div_ceil(8)
    }

    pub fn test_bit(&self, bit: usize) -> bool {
        let idx = bit / COMP_BITS as usize;
        idx < self.comps.len() && (self.comps[idx] >> (bit % COMP_BITS as usize)) & 1 == 1
    }

    fn trim(&mut self) {
        while self.comps.len() > 1 && self.comps[self.comps.len() - 1] == 0 {
            self.comps.pop();
        }
    }

    pub fn add(self, other: Self) -> Self {
        let (long, short) = if self.comps.len() >= other.comps.len() {
            (self, other)
        } else {
            (other, self)
        };
        let mut buf = alloc_comps(long.comps.len() + 1);
        buf[..long.comps.len()].copy_from_slice(&long.comps);
        add_into(&mut buf, &short.comps);
        Self::from_vec(buf)
    }

    /// `self - other`. The flag is set when the true difference is negative,
    /// in which case the magnitude `other - self` is returned.
    pub fn subtract(self, other: Self) -> (Self, bool) {
        match self.cmp(&other) {
            Ordering::Less => {
                let mut buf = alloc_comps(other.comps.len());
                buf.copy_from_slice(&other.comps);
                sub_into(&mut buf, &self.comps);
                (Self::from_vec(buf), true)
            }
            _ => {
                let mut buf = alloc_comps(self.comps.len());
                buf.copy_from_slice(&self.comps);
                sub_into(&mut buf, &other.comps);
                (Self::from_vec(buf), false)
            }
        }
    }

    pub fn multiply(self, other: Self) -> Self {
        Self::from_vec(mul_slices(&self.comps, &other.comps))
    }

    pub fn square(self) -> Self {
        Self::from_vec(mul_slices(&self.comps, &self.comps))
    }

    pub fn int_multiply(self, value: Comp) -> Self {
        let mut buf = alloc_comps(self.comps.len() + 1);
        let mut carry: LongComp = 0;
        for (dst, src) in buf.iter_mut().zip(self.comps.iter()) {
            let t = LongComp::from(*src) * LongComp::from(value) + carry;
            *dst = t as Comp;
            carry = t >> COMP_BITS;
        }
        buf[self.comps.len()] = carry as Comp;
        Self::from_vec(buf)
    }

    /// Quotient of `self / divisor`. The divisor must be non-zero.
    pub fn divide(self, divisor: &Self) -> Self {
        let (q, _) = divmod(&self.comps, &divisor.comps);
        Self::from_vec(q)
    }

    /// Remainder of `self / divisor`. The divisor must be non-zero.
    pub fn modulo(self, divisor: &Self) -> Self {
        let (_, r) = divmod(&self.comps, &divisor.comps);
        Self::from_vec(r)
    }

    /// Drops the `n` lowest components.
    fn comp_right_shift(self, n: usize) -> Self {
        if n >= self.comps.len() {
            return Self::zero();
        }
        Self::from_slice(&self.comps[n..])
    }

    /// Reduces modulo `2^(32 * n)`.
    fn truncate_comps(mut self, n: usize) -> Self {
        if self.comps.len() > n {
            wipe_comps(&mut self.comps[n..]);
            self.comps.truncate(n.max(1));
            self.trim();
        }
        self
    }
}

impl Clone for Bigint {
    fn clone(&self) -> Self {
        Self::from_slice(&self.comps)
    }
}

impl Drop for Bigint {
    fn drop(&mut self) {
        recycle(core::mem::take(&mut self.comps));
    }
}

impl PartialEq for Bigint {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Bigint {}

impl PartialOrd for Bigint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Bigint {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_slices(&self.comps, &other.comps)
    }
}

impl fmt::Debug for Bigint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for (i, comp) in self.comps.iter().rev().enumerate() {
            if i == 0 {
                write!(f, "{comp:x}")?;
            } else {
                write!(f, "{comp:08x}")?;
            }
        }
        Ok(())
    }
}

fn trim_slice(x: &[Comp]) -> &[Comp] {
    let mut len = x.len();
    while len > 1 && x[len - 1] == 0 {
        len -= 1;
    }
    &x[..len]
}

fn cmp_slices(a: &[Comp], b: &[Comp]) -> Ordering {
    let a = trim_slice(a);
    let b = trim_slice(b);
    a.len()
        .cmp(&b.len())
        .then_with(|| a.iter().rev().cmp(b.iter().rev()))
}

/// `acc += b`, propagating the carry through the rest of `acc`.
fn add_into(acc: &mut [Comp], b: &[Comp]) -> Comp {
    debug_assert!(acc.len() >= b.len());
    let mut carry: LongComp = 0;
    for (i, slot) in acc.iter_mut().enumerate() {
        if i >= b.len() && carry == 0 {
            break;
        }
        let t = LongComp::from(*slot) + LongComp::from(*b.get(i).unwrap_or(&0)) + carry;
        *slot = t as Comp;
        carry = t >> COMP_BITS;
    }
    carry as Comp
}

/// `acc -= b`, propagating the borrow through the rest of `acc`.
fn sub_into(acc: &mut [Comp], b: &[Comp]) -> bool {
    let b = trim_slice(b);
    debug_assert!(acc.len() >= b.len());
    let mut borrow = false;
    for (i, slot) in acc.iter_mut().enumerate() {
        if i >= b.len() && !borrow {
            break;
        }
        let (d1, o1) = slot.overflowing_sub(*b.get(i).unwrap_or(&0));
        let (d2, o2) = d1.overflowing_sub(Comp::from(borrow));
        *slot = d2;
        borrow = o1 || o2;
    }
    borrow
}

fn add_slices(a: &[Comp], b: &[Comp]) -> Vec<Comp> {
    let (long, short) = if a.len() >= b.len() { (a, b) } else { (b, a) };
    let mut out = vec![0; long.len() + 1];
    out[..long.len()].copy_from_slice(long);
    add_into(&mut out, short);
    out
}

fn mul_school(a: &[Comp], b: &[Comp]) -> Vec<Comp> {
    let mut out = vec![0; a.len() + b.len()];
    for (i, &ai) in a.iter().enumerate() {
        if ai == 0 {
            continue;
        }
        let mut carry: LongComp = 0;
        for (j, &bj) in b.iter().enumerate() {
            let t = LongComp::from(ai) * LongComp::from(bj) + LongComp::from(out[i + j]) + carry;
            out[i + j] = t as Comp;
            carry = t >> COMP_BITS;
        }
        out[i + b.len()] = carry as Comp;
    }
    out
}

fn mul_slices(a: &[Comp], b: &[Comp]) -> Vec<Comp> {
    let a = trim_slice(a);
    let b = trim_slice(b);
    let half = a.len().max(b.len()) / 2;
    if a.len().min(b.len()) < KARATSUBA_THRESHOLD || a.len() <= half || b.len() <= half {
        return mul_school(a, b);
    }

    // a*b = z2*B^2h + z1*B^h + z0 with z1 = (a0+a1)(b0+b1) - z0 - z2
    let (a0, a1) = a.split_at(half);
    let (b0, b1) = b.split_at(half);
    let z0 = mul_slices(a0, b0);
    let z2 = mul_slices(a1, b1);
    let mut z1 = mul_slices(&add_slices(a0, a1), &add_slices(b0, b1));
    sub_into(&mut z1, &z0);
    sub_into(&mut z1, &z2);

    let mut out = vec![0; a.len() + b.len()];
    out[..z0.len()].copy_from_slice(&z0);
    add_into(&mut out[half..], trim_slice(&z1));
    add_into(&mut out[2 * half..], trim_slice(&z2));
    out
}

fn shl_bits(x: &[Comp], shift: u32, out_len: usize) -> Vec<Comp> {
    let mut out = vec![0; out_len];
    for (i, &comp) in x.iter().enumerate() {
        let wide = LongComp::from(comp) << shift;
        out[i] |= wide as Comp;
        if i + 1 < out_len {
            out[i + 1] |= (wide >> COMP_BITS) as Comp;
        }
    }
    out
}

fn shr_bits(x: &[Comp], shift: u32) -> Vec<Comp> {
    let mut out = alloc_comps(x.len());
    for i in 0..x.len() {
        let hi = x.get(i + 1).copied().unwrap_or(0);
        let wide = (LongComp::from(hi) << COMP_BITS) | LongComp::from(x[i]);
        out[i] = (wide >> shift) as Comp;
    }
    out
}

/// Long division (Knuth vol. 2, algorithm D). Returns `(quotient, remainder)`.
fn divmod(u: &[Comp], v: &[Comp]) -> (Vec<Comp>, Vec<Comp>) {
    let u = trim_slice(u);
    let v = trim_slice(v);
    debug_assert!(!(v.len() == 1 && v[0] == 0), "division by zero");

    if cmp_slices(u, v) == Ordering::Less {
        let mut r = alloc_comps(u.len());
        r.copy_from_slice(u);
        return (alloc_comps(1), r);
    }

    if v.len() == 1 {
        let d = LongComp::from(v[0]).max(1);
        let mut q = alloc_comps(u.len());
        let mut rem: LongComp = 0;
        for i in (0..u.len()).rev() {
            let cur = (rem << COMP_BITS) | LongComp::from(u[i]);
            q[i] = (cur / d) as Comp;
            rem = cur % d;
        }
        let mut r = alloc_comps(1);
        r[0] = rem as Comp;
        return (q, r);
    }

    let n = v.len();
    let m = u.len() - n;
    let shift = v[n - 1].leading_zeros();
    let vn = shl_bits(v, shift, n);
    let mut un = shl_bits(u, shift, u.len() + 1);
    let mut q = alloc_comps(m + 1);

    let v_top = LongComp::from(vn[n - 1]);
    let v_next = u128::from(vn[n - 2]);

    for j in (0..=m).rev() {
        let num = (LongComp::from(un[j + n]) << COMP_BITS) | LongComp::from(un[j + n - 1]);
        let mut qhat = num / v_top;
        let mut rhat = num % v_top;

        while qhat >= COMP_RADIX
            || u128::from(qhat) * v_next
                > ((u128::from(rhat) << COMP_BITS) | u128::from(un[j + n - 2]))
        {
            qhat -= 1;
            rhat += v_top;
            if rhat >= COMP_RADIX {
                break;
            }
        }

        // un[j..=j+n] -= qhat * vn
        let mut borrow: i64 = 0;
        for i in 0..n {
            let p = qhat * LongComp::from(vn[i]);
            let t = i64::from(un[i + j]) - borrow - (p & 0xffff_ffff) as i64;
            un[i + j] = t as Comp;
            borrow = (p >> COMP_BITS) as i64 - (t >> COMP_BITS);
        }
        let t = i64::from(un[j + n]) - borrow;
        un[j + n] = t as Comp;

        q[j] = qhat as Comp;
        if t < 0 {
            // qhat was one too large: add the divisor back
            q[j] = q[j].wrapping_sub(1);
            let mut carry: LongComp = 0;
            for i in 0..n {
                let sum = LongComp::from(un[i + j]) + LongComp::from(vn[i]) + carry;
                un[i + j] = sum as Comp;
                carry = sum >> COMP_BITS;
            }
            un[j + n] = un[j + n].wrapping_add(carry as Comp);
        }
    }

    let r = shr_bits(&un[..n], shift);
    wipe_comps(&mut un);
    (q, r)
}

/// Strategy used to reduce products modulo a standing modulus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    /// Plain long division.
    Classical,
    /// Barrett reduction with a precomputed reciprocal.
    Barrett,
    /// Montgomery multiplication; needs an odd modulus.
    Montgomery,
}

impl Reduction {
    /// The strategy selected at build time through the `reduce-*` features.
    pub const fn configured() -> Self {
        if cfg!(feature = "reduce-classical") {
            Self::Classical
        } else if cfg!(feature = "reduce-barrett") {
            Self::Barrett
        } else {
            Self::Montgomery
        }
    }
}

impl Default for Reduction {
    fn default() -> Self {
        Self::configured()
    }
}

/// Slot of a standing modulus in a [`BiCtx`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModOffset {
    Modulus = 0,
    P = 1,
    Q = 2,
}

/// A modulus together with its reduction constants.
#[derive(Clone)]
pub struct Modulus {
    m: Bigint,
    reduction: Reduction,
    /// Barrett: `floor(B^2k / m)`.
    mu: Option<Bigint>,
    /// Montgomery: `-m^-1 mod B`.
    n0_dash: Comp,
    /// Montgomery: `R^2 mod m` with `R = B^k`.
    r2: Option<Bigint>,
}

impl Modulus {
    fn new(m: Bigint, requested: Reduction) -> Self {
        debug_assert!(!m.is_zero());
        let k = m.comps.len();
        let reduction = match requested {
            Reduction::Montgomery if !m.is_odd() => Reduction::Barrett,
            other => other,
        };

        let mut modulus = Self {
            m,
            reduction,
            mu: None,
            n0_dash: 0,
            r2: None,
        };

        match reduction {
            Reduction::Classical => {}
            Reduction::Barrett => {
                modulus.mu = Some(Bigint::comp_power(2 * k).divide(&modulus.m));
            }
            Reduction::Montgomery => {
                // Newton iteration doubles the correct low bits each round
                let m0 = modulus.m.comps[0];
                let mut inv: Comp = 1;
                for _ in 0..5 {
                    inv = inv.wrapping_mul(2u32.wrapping_sub(m0.wrapping_mul(inv)));
                }
                modulus.n0_dash = inv.wrapping_neg();
                modulus.r2 = Some(Bigint::comp_power(2 * k).modulo(&modulus.m));
            }
        }
        modulus
    }

    pub fn value(&self) -> &Bigint {
        &self.m
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// `x mod m` for any `x`.
    pub fn reduce(&self, x: Bigint) -> Bigint {
        match (&self.mu, self.reduction) {
            (Some(mu), Reduction::Barrett) if x.comps.len() <= 2 * self.m.comps.len() => {
                self.barrett(x, mu)
            }
            _ => x.modulo(&self.m),
        }
    }

    fn barrett(&self, x: Bigint, mu: &Bigint) -> Bigint {
        let k = self.m.comps.len();
        let q3 = x
            .clone()
            .comp_right_shift(k - 1)
            .multiply(mu.clone())
            .comp_right_shift(k + 1);
        let r1 = x.truncate_comps(k + 1);
        let r2 = q3.multiply(self.m.clone()).truncate_comps(k + 1);

        let mut r = match r1.subtract(r2) {
            (diff, false) => diff,
            (diff, true) => Bigint::comp_power(k + 1).subtract(diff).0,
        };
        while r >= self.m {
            r = r.subtract(self.m.clone()).0;
        }
        r
    }

    /// Montgomery reduction: `t * R^-1 mod m` for `t < m * R`.
    fn mont_reduce(&self, t: Bigint) -> Bigint {
        let k = self.m.comps.len();
        let m = &self.m.comps;
        let mut a = alloc_comps(2 * k + 2);
        let len = t.comps.len().min(a.len());
        a[..len].copy_from_slice(&t.comps[..len]);
        drop(t);

        for i in 0..k {
            let u = LongComp::from(a[i].wrapping_mul(self.n0_dash));
            let mut carry: LongComp = 0;
            for j in 0..k {
                let s = LongComp::from(a[i + j]) + u * LongComp::from(m[j]) + carry;
                a[i + j] = s as Comp;
                carry = s >> COMP_BITS;
            }
            let mut idx = i + k;
            while carry != 0 && idx < a.len() {
                let s = LongComp::from(a[idx]) + carry;
                a[idx] = s as Comp;
                carry = s >> COMP_BITS;
                idx += 1;
            }
        }

        let shifted = Bigint::from_slice(&a[k..]);
        recycle(a);
        if shifted >= self.m {
            shifted.subtract(self.m.clone()).0
        } else {
            shifted
        }
    }

    fn to_domain(&self, x: Bigint) -> Bigint {
        match &self.r2 {
            Some(r2) if self.reduction == Reduction::Montgomery => {
                self.mont_reduce(x.multiply(r2.clone()))
            }
            _ => x,
        }
    }

    fn from_domain(&self, x: Bigint) -> Bigint {
        match self.reduction {
            Reduction::Montgomery => self.mont_reduce(x),
            _ => x,
        }
    }

    fn domain_one(&self) -> Bigint {
        self.to_domain(Bigint::from_int(1))
    }

    fn domain_mul(&self, a: Bigint, b: Bigint) -> Bigint {
        match self.reduction {
            Reduction::Montgomery => self.mont_reduce(a.multiply(b)),
            _ => self.reduce(a.multiply(b)),
        }
    }

    fn domain_square(&self, a: Bigint) -> Bigint {
        match self.reduction {
            Reduction::Montgomery => self.mont_reduce(a.square()),
            _ => self.reduce(a.square()),
        }
    }

    /// `a * b mod m` for `a, b < m`.
    pub fn mod_mul(&self, a: Bigint, b: Bigint) -> Bigint {
        // (aR * b) R^-1 = ab, already out of the Montgomery domain
        self.domain_mul(self.to_domain(a), b)
    }

    /// `base ^ exp mod m` by sliding-window exponentiation.
    pub fn mod_power(&self, base: Bigint, exp: &Bigint) -> Bigint {
        let base = if base >= self.m {
            self.reduce(base)
        } else {
            base
        };
        let bits = exp.bit_len();
        if exp.is_zero() {
            return Bigint::from_int(1).modulo(&self.m);
        }

        let window = window_size(bits);
        let g = self.to_domain(base);
        let mut odd_powers = Vec::with_capacity(1 << (window - 1));
        if window > 1 {
            let g2 = self.domain_square(g.clone());
            odd_powers.push(g);
            for i in 1..(1usize << (window - 1)) {
                let next = self.domain_mul(odd_powers[i - 1].clone(), g2.clone());
                odd_powers.push(next);
            }
        } else {
            odd_powers.push(g);
        }

        let mut acc = self.domain_one();
        let mut i = bits as isize - 1;
        while i >= 0 {
            if !exp.test_bit(i as usize) {
                acc = self.domain_square(acc);
                i -= 1;
                continue;
            }

            // longest window ending in a set bit
            let mut low = (i - window as isize + 1).max(0);
            while !exp.test_bit(low as usize) {
                low += 1;
            }
            let mut value = 0usize;
            for bit in (low..=i).rev() {
                value = (value << 1) | usize::from(exp.test_bit(bit as usize));
            }
            for _ in low..=i {
                acc = self.domain_square(acc);
            }
            acc = self.domain_mul(acc, odd_powers[(value - 1) / 2].clone());
            i = low - 1;
        }

        self.from_domain(acc)
    }
}

fn window_size(exp_bits: usize) -> usize {
    match exp_bits {
        672.. => 6,
        240..=671 => 5,
        80..=239 => 4,
        24..=79 => 3,
        _ => 1,
    }
}

/// Bignum context: standing moduli plus the reduction strategy for new ones.
#[derive(Clone)]
pub struct BiCtx {
    reduction: Reduction,
    moduli: [Option<Modulus>; 3],
}

impl BiCtx {
    pub fn new() -> Self {
        Self::with_reduction(Reduction::configured())
    }

    pub fn with_reduction(reduction: Reduction) -> Self {
        Self {
            reduction,
            moduli: [None, None, None],
        }
    }

    /// Installs `m` as a standing modulus, precomputing its reduction
    /// constants. Fails for a zero modulus.
    pub fn set_mod(&mut self, m: Bigint, offset: ModOffset) -> Result<(), Error> {
        if m.is_zero() {
            return Err(Error::bad_data("zero modulus"));
        }
        self.moduli[offset as usize] = Some(Modulus::new(m, self.reduction));
        Ok(())
    }

    pub fn free_mod(&mut self, offset: ModOffset) {
        self.moduli[offset as usize] = None;
    }

    pub fn modulus(&self, offset: ModOffset) -> Option<&Modulus> {
        self.moduli[offset as usize].as_ref()
    }

    /// Chinese remainder recombination of `c^d mod pq` from the CRT
    /// exponents, using the `P` and `Q` standing moduli.
    pub fn crt(&self, c: Bigint, dp: &Bigint, dq: &Bigint, qinv: &Bigint) -> Option<Bigint> {
        let p = self.modulus(ModOffset::P)?;
        let q = self.modulus(ModOffset::Q)?;

        let m1 = p.mod_power(c.clone(), dp);
        let m2 = q.mod_power(c, dq);

        // h = qinv * (m1 - m2) mod p
        let diff = match m1.subtract(p.reduce(m2.clone())) {
            (diff, false) => diff,
            (diff, true) => p.value().clone().subtract(diff).0,
        };
        let h = p.mod_mul(diff, p.reduce(qinv.clone()));

        Some(m2.add(h.multiply(q.value().clone())))
    }
}

impl Default for BiCtx {
    fn default() -> Self {
        Self::new()
    }
}
