//! Extended-arithmetic opcode table.
//!
//! Each row holds a pair of operations selected by the S bit of the
//! extended mode. Every operation reads two 16-bit sources and updates a
//! destination pair `(dl, dh)` of extended registers in place, so
//! accumulate forms can fold the old low word in. Fixed-point variants
//! (`fx`) treat each operand as a byte-swapped 8.8 value.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_lossless,
    clippy::needless_pass_by_ref_mut,
    clippy::trivially_copy_pass_by_ref
)]

/// One extended operation: `(src1, src2, dl, dh)`.
pub(crate) type ExtFn = fn(u16, u16, &mut u16, &mut u16);

/// How a table row executes.
#[derive(Clone, Copy)]
pub(crate) enum ExtKind {
    /// Two-source operation per S bit.
    Pair([ExtFn; 2]),
    /// 32-by-16 division with a register-pair dividend. The S bit makes
    /// it a no-op.
    Div32 { signed: bool },
}

/// A table row with its mnemonics.
#[derive(Clone, Copy)]
pub(crate) struct ExtRow {
    pub(crate) names: [&'static str; 2],
    pub(crate) kind: ExtKind,
}

/// Number of defined extended opcodes.
pub(crate) const EXT_OPCODE_COUNT: usize = 97;

/// Address of the memory-mapped "previous value" register.
pub(crate) const PV_ADDR: u16 = 0x9F8D;

const fn row(n0: &'static str, f0: ExtFn, n1: &'static str, f1: ExtFn) -> ExtRow {
    ExtRow {
        names: [n0, n1],
        kind: ExtKind::Pair([f0, f1]),
    }
}

const fn same(name: &'static str, f: ExtFn) -> ExtRow {
    row(name, f, name, f)
}

const fn as_i32(x: u16) -> i32 {
    x as i16 as i32
}

const fn swap(x: u16) -> u16 {
    x.swap_bytes()
}

const fn pack(hi: u16, lo: u16) -> u16 {
    ((hi & 0xFF) << 8) | (lo & 0xFF)
}

const fn all_or_none(cond: bool) -> u16 {
    if cond {
        0xFFFF
    } else {
        0
    }
}

fn add3(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.wrapping_add(s2);
}
fn nadd(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.wrapping_add(s2).wrapping_neg();
}
fn sub3(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.wrapping_sub(s2);
}
fn addfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap(swap(s1).wrapping_add(swap(s2)));
}
fn naddfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap(swap(s1).wrapping_neg().wrapping_sub(swap(s2)));
}
fn subfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap(swap(s1).wrapping_sub(swap(s2)));
}
fn and3(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1 & s2;
}
fn nand(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = !(s1 & s2);
}
fn andn(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = !s1 & s2;
}
fn orn(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = !(!s1 & s2);
}
fn or3(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1 | s2;
}
fn nor(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = !(s1 | s2);
}
fn xor3(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1 ^ s2;
}
fn xnor(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = !(s1 ^ s2);
}

// Shifts spill the bits shifted out into `dh`.

fn shl3(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let s = u32::from(s2 & 0xF);
    *dl = ((s1 as u32) << s) as u16;
    *dh = (as_i32(s1) >> if s == 0 { 15 } else { 16 - s }) as u16;
}
fn shlu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let s = u32::from(s2 & 0xF);
    *dl = ((s1 as u32) << s) as u16;
    *dh = if s == 0 { 0 } else { (u32::from(s1) >> (16 - s)) as u16 };
}
fn shr3(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let s = u32::from(s2 & 0xF);
    *dl = (as_i32(s1) >> s) as u16;
    *dh = if s == 0 { 0 } else { ((s1 as u32) << (16 - s)) as u16 };
}
fn shru(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let s = u32::from(s2 & 0xF);
    *dl = s1 >> s;
    *dh = if s == 0 { 0 } else { ((s1 as u32) << (16 - s)) as u16 };
}
fn bshlu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let s = u32::from((s2 & 0xF).min(8));
    let (hi, lo) = (u32::from(s1 >> 8), u32::from(s1 & 0xFF));
    *dl = pack((hi << s) as u16, (lo << s) as u16);
    *dh = pack((hi >> (8 - s)) as u16, (lo >> (8 - s)) as u16);
}
fn bshru(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let s = u32::from((s2 & 0xF).min(8));
    let (hi, lo) = (u32::from(s1 >> 8), u32::from(s1 & 0xFF));
    *dl = pack((hi >> s) as u16, (lo >> s) as u16);
    *dh = pack((hi << (8 - s)) as u16, (lo << (8 - s)) as u16);
}
fn rol(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.rotate_left(u32::from(s2 & 0xF));
}
fn ror(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.rotate_right(u32::from(s2 & 0xF));
}

fn bitcntl(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let n = u32::from(s2 & 0xF) + 1;
    *dl = (s1 >> (16 - n)).count_ones() as u16;
}
fn bitcntr(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let n = u32::from(s2 & 0xF) + 1;
    *dl = (u32::from(s1) & ((1 << n) - 1)).count_ones() as u16;
}
fn bitrevl(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let (mut input, mut out) = (s1, 0u16);
    for _ in 0..=(s2 & 0xF) {
        out = (out >> 1) | (input & 0x8000);
        input <<= 1;
    }
    *dl = out;
}
fn bitrevr(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let (mut input, mut out) = (s1, 0u16);
    for _ in 0..=(s2 & 0xF) {
        out = (out << 1) | (input & 1);
        input >>= 1;
    }
    *dl = out;
}
fn lmo(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = (0..=(s2 & 0xF))
        .rev()
        .find(|&i| s1 & (1 << i) != 0)
        .unwrap_or(0xFFFF);
}
fn lmz(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = (0..=(s2 & 0xF))
        .rev()
        .find(|&i| s1 & (1 << i) == 0)
        .unwrap_or(0xFFFF);
}
fn rmo(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = ((s2 & 0xF)..=15)
        .find(|&i| s1 & (1 << i) != 0)
        .unwrap_or(0xFFFF);
}
fn rmz(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = ((s2 & 0xF)..=15)
        .find(|&i| s1 & (1 << i) == 0)
        .unwrap_or(0xFFFF);
}

fn repack(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    *dl = pack(s1, s2);
    *dh = pack(s1 >> 8, s2 >> 8);
}
fn packl(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = pack(s1, s2);
}
fn packh(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = pack(s1 >> 8, s2 >> 8);
}
fn packlh(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = pack(s1, s2 >> 8);
}
fn btog(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1 ^ (1 << (s2 & 0xF));
}
fn bset(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1 | (1 << (s2 & 0xF));
}
fn bclr(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1 & !(1 << (s2 & 0xF));
}

// Comparisons produce all-ones or zero; the `a` forms AND into `dl`.

fn cmpeq(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none(s1 == s2);
}
fn cmpne(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none(s1 != s2);
}
fn cmpeqa(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none(s1 == s2);
}
fn cmpnea(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none(s1 != s2);
}
fn cmpltu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none(s1 < s2);
}
fn cmpleu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none(s1 <= s2);
}
fn cmpltua(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none(s1 < s2);
}
fn cmpleua(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none(s1 <= s2);
}
fn cmpltfxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none(swap(s1) < swap(s2));
}
fn cmplefxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none(swap(s1) <= swap(s2));
}
fn cmpltfxua(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none(swap(s1) < swap(s2));
}
fn cmplefxua(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none(swap(s1) <= swap(s2));
}
fn cmplt(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none((s1 as i16) < (s2 as i16));
}
fn cmple(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none((s1 as i16) <= (s2 as i16));
}
fn cmplta(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none((s1 as i16) < (s2 as i16));
}
fn cmplea(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none((s1 as i16) <= (s2 as i16));
}
fn cmpltfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none((swap(s1) as i16) < (swap(s2) as i16));
}
fn cmplefx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = all_or_none((swap(s1) as i16) <= (swap(s2) as i16));
}
fn cmpltfxa(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none((swap(s1) as i16) < (swap(s2) as i16));
}
fn cmplefxa(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl &= all_or_none((swap(s1) as i16) <= (swap(s2) as i16));
}

fn min(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = if (s1 as i16) < (s2 as i16) { s1 } else { s2 };
}
fn minu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.min(s2);
}
fn minfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = if (swap(s1) as i16) < (swap(s2) as i16) { s1 } else { s2 };
}
fn minfxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = if swap(s1) < swap(s2) { s1 } else { s2 };
}
fn max(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = if (s1 as i16) > (s2 as i16) { s1 } else { s2 };
}
fn maxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.max(s2);
}
fn maxfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = if (swap(s1) as i16) > (swap(s2) as i16) { s1 } else { s2 };
}
fn maxfxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = if swap(s1) > swap(s2) { s1 } else { s2 };
}

fn clamp_between<T: Ord + Copy>(a: T, b: T, v: T) -> T {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    v.max(lo).min(hi)
}
fn bound(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = clamp_between(s1 as i16, s2 as i16, *dl as i16) as u16;
}
fn boundu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = clamp_between(s1, s2, *dl);
}
fn boundfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let v = clamp_between(swap(s1) as i16, swap(s2) as i16, swap(*dl) as i16);
    *dl = swap(v as u16);
}
fn boundfxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap(clamp_between(swap(s1), swap(s2), swap(*dl)));
}
fn addcirc(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let mask = ((1u32 << (s2 & 0xF)) - 1) as u16;
    *dl = (*dl & !mask) | (dl.wrapping_add(s1) & mask);
}
fn subcirc(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let mask = ((1u32 << (s2 & 0xF)) - 1) as u16;
    *dl = (*dl & !mask) | (dl.wrapping_sub(s1) & mask);
}

/// Sixteen-sector angle of the vector `(s1, s2)`, sector 0 centred on the
/// positive X axis.
fn atan2(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let (x, y) = (s1 as i16, s2 as i16);
    let mut a = 0u16;
    let mut uy = if y < 0 {
        a ^= 0x1F;
        y.wrapping_neg() as u16
    } else {
        y as u16
    };
    let mut ux = if x < 0 {
        a ^= 0xF;
        x.wrapping_neg() as u16
    } else {
        x as u16
    };
    if uy > ux {
        std::mem::swap(&mut ux, &mut uy);
        a ^= 0x7;
    }
    if ux != 0 {
        let shift = ux.leading_zeros();
        ux <<= shift;
        uy <<= shift;
    }

    let scaled = |slope: u32| ((u32::from(ux) * slope) >> 16) as u16;
    if uy > scaled(0x6A0A) {
        a ^= 0x2;
        if uy > scaled(0xAB0E) {
            a ^= 0x1;
        }
    } else if uy > scaled(0x32EC) {
        a ^= 0x1;
    }
    *dl = ((a + 1) >> 1) & 0xF;
}
fn atan2fx(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    atan2(swap(s1), swap(s2), dl, dh);
}

fn subabs(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = (as_i32(s1) - as_i32(s2)).unsigned_abs() as u16;
}
fn subabsu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = (i32::from(s1) - i32::from(s2)).unsigned_abs() as u16;
}
fn subabsfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap((as_i32(swap(s1)) - as_i32(swap(s2))).unsigned_abs() as u16);
}
fn subabsfxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap((i32::from(swap(s1)) - i32::from(swap(s2))).unsigned_abs() as u16);
}

/// Octagonal distance approximation `(123 * max + 51 * min) / 128`.
fn octagonal(u1: u32, u2: u32) -> u16 {
    let (mx, mn) = if u1 > u2 { (u1, u2) } else { (u2, u1) };
    ((mx * 123 + mn * 51) >> 7) as u16
}
fn dist(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = octagonal(as_i32(s1).unsigned_abs(), as_i32(s2).unsigned_abs());
}
fn distu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = octagonal(u32::from(s1), u32::from(s2));
}
fn distfx(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap(octagonal(
        as_i32(swap(s1)).unsigned_abs(),
        as_i32(swap(s2)).unsigned_abs(),
    ));
}
fn distfxu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap(octagonal(u32::from(swap(s1)), u32::from(swap(s2))));
}

fn split32(value: u32, dl: &mut u16, dh: &mut u16) {
    *dl = value as u16;
    *dh = (value >> 16) as u16;
}
fn sum_of_squares(l1: i64, l2: i64, dl: &mut u16, dh: &mut u16) {
    let p = l1 * l1 + l2 * l2;
    if p < 0xFFFF_FFFF {
        split32(p as u32, dl, dh);
    } else {
        *dl = 0xFFFF;
        *dh = 0xFFFF;
    }
}
fn sumsq(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    sum_of_squares(i64::from(s1 as i16), i64::from(s2 as i16), dl, dh);
}
fn sumsqu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    sum_of_squares(i64::from(s1), i64::from(s2), dl, dh);
}
fn sumsqfx(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let magnitude = |v: u16| {
        let v = swap(v);
        if (v as i16) < 0 {
            v.wrapping_neg()
        } else {
            v
        }
    };
    sumsqu(magnitude(s1), magnitude(s2), dl, dh);
}
fn sumsqfxu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    sumsqu(swap(s1), swap(s2), dl, dh);
}

fn mpy(p: i64, dl: &mut u16, dh: &mut u16) {
    split32(p as u32, dl, dh);
}
fn mpyss(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    mpy(i64::from(s1 as i16) * i64::from(s2 as i16), dl, dh);
}
fn mpysu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    mpy(i64::from(s1 as i16) * i64::from(s2), dl, dh);
}
fn mpyus(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    mpy(i64::from(s1) * i64::from(s2 as i16), dl, dh);
}
fn mpyuu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    mpy(i64::from(s1) * i64::from(s2), dl, dh);
}
fn mpy16(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.wrapping_mul(s2);
}
/// 8.8 product, returned byte-swapped: integer part low, fraction high.
fn mpy_fx(p: i64) -> u16 {
    let p = p as u32;
    ((p & 0xFF00) | ((p >> 16) & 0xFF)) as u16
}
fn mpyfxss(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = mpy_fx(i64::from(swap(s1) as i16) * i64::from(swap(s2) as i16));
}
fn mpyfxsu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = mpy_fx(i64::from(swap(s1) as i16) * i64::from(swap(s2)));
}
fn mpyfxus(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = mpy_fx(i64::from(swap(s1)) * i64::from(swap(s2) as i16));
}
fn mpyfxuu(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = mpy_fx(i64::from(swap(s1)) * i64::from(swap(s2)));
}

fn isqrt32(x: u32) -> u16 {
    let mut guess = 0u32;
    let mut bit = 0x8000u32;
    while bit != 0 {
        guess |= bit;
        if guess * guess > x {
            guess ^= bit;
        }
        bit >>= 1;
    }
    guess as u16
}
fn isqrt(s1: u16, _: u16, dl: &mut u16, _: &mut u16) {
    *dl = isqrt32(u32::from(s1));
}
fn isqrtfx(_: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = swap(isqrt32(256 * u32::from(swap(s2))));
}

fn aal(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let tile = (u32::from(s1 & 0xFF).wrapping_sub(0x20) & 0x1FF) << 3;
    *dl = (tile as u16).wrapping_add(s2);
}
fn aah(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    let tile = (u32::from(s1 >> 8).wrapping_sub(0x20) & 0x1FF) << 3;
    *dl = (tile as u16).wrapping_add(s2);
}

fn divs(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    if s2 == 0 {
        *dl = 0x7FFF;
        *dh = 0x7FFF;
        return;
    }
    let (i1, i2) = (as_i32(s1), as_i32(s2));
    *dl = (i1 / i2) as u16;
    *dh = (i1 % i2) as u16;
}
fn divu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    if s2 == 0 {
        *dl = 0xFFFF;
        *dh = 0xFFFF;
        return;
    }
    *dl = s1 / s2;
    *dh = s1 % s2;
}
fn divfxs(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    *dl = swap(0x7FFF);
    *dh = swap(0x7FFF);
    if s2 == 0 {
        return;
    }
    let (i1, i2) = (as_i32(swap(s1)) * 256, as_i32(swap(s2)));
    let q = i1 / i2;
    if (-0x8000..=0x7FFF).contains(&q) {
        *dl = swap(q as u16);
        *dh = swap((i1 % i2) as u16);
    }
}
fn divfxu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    *dl = 0xFFFF;
    *dh = 0xFFFF;
    if s2 == 0 {
        return;
    }
    let (u1, u2) = (u32::from(swap(s1)) << 8, u32::from(swap(s2)));
    let q = u1 / u2;
    if q <= 0xFFFF {
        *dl = swap(q as u16);
        *dh = swap((u1 % u2) as u16);
    }
}

/// Signed 32/16 division. Leaves `0x7FFF` in both halves when the
/// divisor is zero or the quotient overflows.
pub(crate) fn div32s(lo: u16, hi: u16, divisor: u16, dl: &mut u16, dh: &mut u16) {
    *dl = 0x7FFF;
    *dh = 0x7FFF;
    let i1 = (as_i32(hi) << 16) | i32::from(lo);
    let i2 = as_i32(divisor);
    if i2 == 0 {
        return;
    }
    let (q, r) = (i64::from(i1) / i64::from(i2), i64::from(i1) % i64::from(i2));
    if (-0x8000..=0x7FFF).contains(&q) {
        *dl = q as u16;
        *dh = r as u16;
    }
}

/// Unsigned 32/16 division. Leaves `0xFFFF` in both halves when the
/// divisor is zero or the quotient overflows.
pub(crate) fn div32u(lo: u16, hi: u16, divisor: u16, dl: &mut u16, dh: &mut u16) {
    *dl = 0xFFFF;
    *dh = 0xFFFF;
    let u1 = (u32::from(hi) << 16) | u32::from(lo);
    let u2 = u32::from(divisor);
    if u2 == 0 {
        return;
    }
    let q = u1 / u2;
    if q <= 0xFFFF {
        *dl = q as u16;
        *dh = (u1 % u2) as u16;
    }
}

fn i2bcd(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let value = (u32::from(s1) << 16) | u32::from(s2);
    if value >= 99_999_999 {
        *dh = 0x9999;
        *dl = 0x9999;
        return;
    }
    let digits = |v: u32| {
        (0..4).fold(0u16, |acc, i| {
            acc | ((((v / 10u32.pow(i)) % 10) as u16) << (4 * i))
        })
    };
    *dh = digits(value / 10_000);
    *dl = digits(value % 10_000);
}
fn bcd2i(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    let value = |v: u16| {
        (0..4).fold(0u32, |acc, i| {
            acc + u32::from((v >> (4 * i)) & 0xF) * 10u32.pow(i)
        })
    };
    split32(value(s1) * 10_000 + value(s2), dl, dh);
}

/// Four-digit BCD add or subtract. Digits A..F count as 10..15. With
/// `carry_in`, bits 2..0 of `dl` are a signed carry (-4..=3); with
/// `carry_out`, the signed carry out of the top digit lands in `dh`.
fn bcd_arith(
    s1: u16,
    s2: u16,
    dl: &mut u16,
    dh: &mut u16,
    carry_in: bool,
    carry_out: bool,
    add: bool,
) {
    let mut carry = if carry_in {
        ((i32::from(*dl) & 7) ^ 4) - 4
    } else {
        0
    };
    let mut out = 0u16;
    for shift in [0, 4, 8, 12] {
        let d1 = i32::from((s1 >> shift) & 0xF);
        let d2 = i32::from((s2 >> shift) & 0xF);
        let raw = carry + if add { d1 + d2 } else { d1 - d2 };
        carry = raw.div_euclid(10);
        out |= (raw.rem_euclid(10) as u16) << shift;
    }
    *dl = out;
    if carry_out {
        *dh = carry as u16;
    }
}
fn abcd(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, false, false, true);
}
fn abcdl(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, false, true, true);
}
fn abcdm(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, true, true, true);
}
fn abcdh(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, true, false, true);
}
fn sbcd(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, false, false, false);
}
fn sbcdl(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, false, true, false);
}
fn sbcdm(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, true, true, false);
}
fn sbcdh(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    bcd_arith(s1, s2, dl, dh, true, false, false);
}

fn adds(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    split32((as_i32(s1) + as_i32(s2)) as u32, dl, dh);
}
fn addu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    split32(u32::from(s1) + u32::from(s2), dl, dh);
}
fn addm(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    split32(u32::from(s1) + u32::from(s2) + u32::from(*dl), dl, dh);
}
fn addh(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.wrapping_add(s2).wrapping_add(*dl);
}
fn subs(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    split32((as_i32(s1) - as_i32(s2)) as u32, dl, dh);
}
fn subu(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    split32((i32::from(s1) - i32::from(s2)) as u32, dl, dh);
}
fn subm(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    split32(
        (i32::from(s1) - i32::from(s2) + as_i32(*dl)) as u32,
        dl,
        dh,
    );
}
fn subh(s1: u16, s2: u16, dl: &mut u16, _: &mut u16) {
    *dl = s1.wrapping_sub(s2).wrapping_add(*dl);
}
fn dmov(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    *dh = s1;
    *dl = s2;
}
fn addsub(s1: u16, s2: u16, dl: &mut u16, dh: &mut u16) {
    *dh = s1.wrapping_add(s2);
    *dl = s1.wrapping_sub(s2);
}

/// The extended opcode table, indexed by the high byte of the operand
/// word.
pub(crate) const EXT_TABLE: [ExtRow; EXT_OPCODE_COUNT] = [
    // 0x00
    row("ADD3", add3, "NADD", nadd),
    row("ADDFX", addfx, "NADDFX", naddfx),
    same("SUB3", sub3),
    same("SUBFX", subfx),
    row("AND3", and3, "NAND", nand),
    row("ANDN", andn, "ORN", orn),
    row("OR3", or3, "NOR", nor),
    row("XOR3", xor3, "XNOR", xnor),
    // 0x08
    same("SHL3", shl3),
    same("SHLU", shlu),
    same("SHR3", shr3),
    same("SHRU", shru),
    same("BSHLU", bshlu),
    same("BSHRU", bshru),
    same("ROL", rol),
    same("ROR", ror),
    // 0x10
    same("BITCNTL", bitcntl),
    same("BITCNTR", bitcntr),
    same("BITREVL", bitrevl),
    same("BITREVR", bitrevr),
    same("LMO", lmo),
    same("LMZ", lmz),
    same("RMO", rmo),
    same("RMZ", rmz),
    // 0x18
    same("REPACK", repack),
    same("PACKL", packl),
    same("PACKH", packh),
    same("PACKLH", packlh),
    same("BTOG", btog),
    same("BSET", bset),
    same("BCLR", bclr),
    row("CMPEQ", cmpeq, "CMPNE", cmpne),
    // 0x20
    same("CMPLTU", cmpltu),
    same("CMPLTFXU", cmpltfxu),
    same("CMPLEU", cmpleu),
    same("CMPLEFXU", cmplefxu),
    same("CMPLTU&", cmpltua),
    same("CMPLTFXU&", cmpltfxua),
    same("CMPLEU&", cmpleua),
    same("CMPLEFXU&", cmplefxua),
    // 0x28
    same("CMPLT", cmplt),
    same("CMPLTFX", cmpltfx),
    same("CMPLE", cmple),
    same("CMPLEFX", cmplefx),
    same("CMPLT&", cmplta),
    same("CMPLTFX&", cmpltfxa),
    same("CMPLE&", cmplea),
    same("CMPLEFX&", cmplefxa),
    // 0x30
    row("MIN", min, "MINU", minu),
    row("MINFX", minfx, "MINFXU", minfxu),
    row("MAX", max, "MAXU", maxu),
    row("MAXFX", maxfx, "MAXFXU", maxfxu),
    row("BOUND", bound, "BOUNDU", boundu),
    row("BOUNDFX", boundfx, "BOUNDFXU", boundfxu),
    same("ADDCIRC", addcirc),
    same("SUBCIRC", subcirc),
    // 0x38
    same("ATAN2", atan2),
    same("ATAN2FX", atan2fx),
    row("SUBABS", subabs, "SUBABSU", subabsu),
    row("SUBABSFX", subabsfx, "SUBABSFXU", subabsfxu),
    row("DIST", dist, "DISTU", distu),
    row("DISTFX", distfx, "DISTFXU", distfxu),
    row("SUMSQ", sumsq, "SUMSQU", sumsqu),
    row("SUMSQFX", sumsqfx, "SUMSQFXU", sumsqfxu),
    // 0x40
    row("MPYSS", mpyss, "MPYUU", mpyuu),
    row("MPYFXSS", mpyfxss, "MPYFXUU", mpyfxuu),
    same("MPYSU", mpysu),
    same("MPYFXSU", mpyfxsu),
    same("MPYUS", mpyus),
    same("MPYFXUS", mpyfxus),
    same("MPY16", mpy16),
    row("ISQRT", isqrt, "ISQRTFX", isqrtfx),
    // 0x48
    same("AAL", aal),
    same("AAH", aah),
    same("DIVS", divs),
    same("DIVFXS", divfxs),
    same("DIVU", divu),
    same("DIVFXU", divfxu),
    ExtRow {
        names: ["DIV32S", "DIV32S"],
        kind: ExtKind::Div32 { signed: true },
    },
    ExtRow {
        names: ["DIV32U", "DIV32U"],
        kind: ExtKind::Div32 { signed: false },
    },
    // 0x50
    row("ADDS", adds, "ADDU", addu),
    row("ADDH", addh, "ADDM", addm),
    same("SUBS", subs),
    same("SUBU", subu),
    same("SUBM", subm),
    same("SUBH", subh),
    same("DMOV", dmov),
    same("ADDSUB", addsub),
    // 0x58
    row("ABCD", abcd, "ABCDL", abcdl),
    row("ABCDH", abcdh, "ABCDM", abcdm),
    same("SBCD", sbcd),
    same("SBCDL", sbcdl),
    same("SBCDM", sbcdm),
    same("SBCDH", sbcdh),
    same("I2BCD", i2bcd),
    same("BCD2I", bcd2i),
    // 0x60
    row("CMPEQ&", cmpeqa, "CMPNE&", cmpnea),
];

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{div32s, div32u, ExtKind, EXT_TABLE};

    const DIV32S: usize = 0x4E;
    const DIV32U: usize = 0x4F;

    fn run(opcode: usize, s_bit: usize, s1: u16, s2: u16, dl: u16, dh: u16) -> (u16, u16) {
        let ExtKind::Pair(fns) = EXT_TABLE[opcode].kind else {
            panic!("opcode {opcode:#04x} is not a pair");
        };
        let (mut dl, mut dh) = (dl, dh);
        fns[s_bit](s1, s2, &mut dl, &mut dh);
        (dl, dh)
    }

    #[test]
    fn only_the_div32_rows_are_special() {
        for (opcode, row) in EXT_TABLE.iter().enumerate() {
            let special = matches!(row.kind, ExtKind::Div32 { .. });
            assert_eq!(special, opcode == DIV32S || opcode == DIV32U, "{opcode:#04x}");
        }
        assert_eq!(EXT_TABLE[0].names, ["ADD3", "NADD"]);
        assert_eq!(EXT_TABLE[0x60].names, ["CMPEQ&", "CMPNE&"]);
    }

    #[rstest]
    #[case(0x00, 0, 3, 4, 7)] // ADD3
    #[case(0x00, 1, 3, 4, 0xFFF9)] // NADD
    #[case(0x02, 0, 3, 4, 0xFFFF)] // SUB3
    #[case(0x05, 0, 0x00FF, 0x0F0F, 0x0F00)] // ANDN
    #[case(0x0E, 0, 0x8001, 1, 0x0003)] // ROL
    #[case(0x0F, 0, 0x8001, 4, 0x1800)] // ROR
    #[case(0x10, 0, 0xF000, 3, 4)] // BITCNTL over the top 4 bits
    #[case(0x11, 0, 0x00FF, 3, 4)] // BITCNTR over the low 4 bits
    #[case(0x13, 0, 0x0001, 3, 0x0008)] // BITREVR over 4 bits
    #[case(0x14, 0, 0x0010, 15, 4)] // LMO
    #[case(0x16, 0, 0x0000, 0, 0xFFFF)] // RMO finds nothing
    #[case(0x19, 0, 0x1234, 0x5678, 0x3478)] // PACKL
    #[case(0x1D, 0, 0x0000, 0x000F, 0x8000)] // BSET
    #[case(0x1F, 0, 5, 5, 0xFFFF)] // CMPEQ
    #[case(0x28, 0, 0xFFFF, 1, 0xFFFF)] // CMPLT: -1 < 1
    #[case(0x20, 0, 0xFFFF, 1, 0x0000)] // CMPLTU
    #[case(0x30, 0, 0xFFFF, 1, 0xFFFF)] // MIN picks -1
    #[case(0x30, 1, 0xFFFF, 1, 0x0001)] // MINU picks 1
    #[case(0x3A, 0, 0xFFFE, 3, 5)] // SUBABS
    #[case(0x3C, 0, 100, 0, 96)] // DIST on an axis
    #[case(0x46, 0, 0x0100, 0x0100, 0x0000)] // MPY16 wraps
    #[case(0x47, 0, 144, 0, 12)] // ISQRT
    #[case(0x48, 0, 0x0041, 0x0200, 0x0308)] // AAL: ('A' - 0x20) * 8 + base
    fn low_word_results(
        #[case] opcode: usize,
        #[case] s_bit: usize,
        #[case] s1: u16,
        #[case] s2: u16,
        #[case] expected: u16,
    ) {
        assert_eq!(run(opcode, s_bit, s1, s2, 0, 0).0, expected);
    }

    #[test]
    fn shifts_spill_into_the_high_word() {
        assert_eq!(run(0x08, 0, 0x8001, 4, 0, 0), (0x0010, 0xFFF8)); // SHL3
        assert_eq!(run(0x09, 0, 0x8001, 4, 0, 0), (0x0010, 0x0008)); // SHLU
        assert_eq!(run(0x0A, 0, 0x8010, 4, 0, 0), (0xF801, 0x0000)); // SHR3
        assert_eq!(run(0x0B, 0, 0x8013, 4, 0, 0), (0x0801, 0x3000)); // SHRU
        assert_eq!(run(0x08, 0, 0x8000, 0, 0, 0), (0x8000, 0xFFFF));
        assert_eq!(run(0x0C, 0, 0x8181, 1, 0, 0), (0x0202, 0x0101)); // BSHLU
    }

    #[test]
    fn multiplies_produce_full_products() {
        assert_eq!(run(0x40, 0, 0xFFFF, 0xFFFF, 0, 0), (1, 0)); // -1 * -1
        assert_eq!(run(0x40, 1, 0xFFFF, 0xFFFF, 0, 0), (0x0001, 0xFFFE));
        assert_eq!(run(0x42, 0, 0xFFFF, 2, 0, 0), (0xFFFE, 0xFFFF)); // -1 * 2
    }

    #[test]
    fn divides_saturate_on_zero() {
        assert_eq!(run(0x4A, 0, 7, 2, 0, 0), (3, 1));
        assert_eq!(run(0x4A, 0, 0xFFF9, 2, 0, 0), (0xFFFD, 0xFFFF)); // -7 / 2
        assert_eq!(run(0x4A, 0, 7, 0, 0, 0), (0x7FFF, 0x7FFF));
        assert_eq!(run(0x4C, 0, 7, 0, 0, 0), (0xFFFF, 0xFFFF));
    }

    #[test]
    fn wide_division_checks_quotient_range() {
        let (mut dl, mut dh) = (0, 0);
        div32u(0x0000, 0x0001, 2, &mut dl, &mut dh);
        assert_eq!((dl, dh), (0x8000, 0));
        div32u(0x0000, 0x0002, 2, &mut dl, &mut dh);
        assert_eq!((dl, dh), (0xFFFF, 0xFFFF));
        div32s(0xFFF9, 0xFFFF, 2, &mut dl, &mut dh);
        assert_eq!((dl, dh), (0xFFFD, 0xFFFF));
        div32s(0, 0x4000, 1, &mut dl, &mut dh);
        assert_eq!((dl, dh), (0x7FFF, 0x7FFF));
    }

    #[test]
    fn accumulate_forms_fold_in_the_old_low_word() {
        assert_eq!(run(0x51, 1, 0xFFFF, 1, 1, 0), (1, 1)); // ADDM
        assert_eq!(run(0x51, 0, 0xFFFF, 1, 1, 9), (1, 9)); // ADDH keeps dh
        assert_eq!(run(0x36, 0, 3, 2, 0x0103, 0), (0x0102, 0)); // ADDCIRC mod 4
        assert_eq!(run(0x60, 0, 1, 2, 0xFFFF, 0), (0, 0)); // CMPEQ&
    }

    #[test]
    fn bound_clamps_into_range() {
        assert_eq!(run(0x34, 0, 10, 0xFFF6, 20, 0).0, 10);
        assert_eq!(run(0x34, 0, 10, 0xFFF6, 0xFF00, 0).0, 0xFFF6);
        assert_eq!(run(0x34, 1, 10, 20, 15, 0).0, 15);
    }

    #[test]
    fn bcd_conversions_round_trip_known_values() {
        assert_eq!(run(0x5E, 0, 0x00BC, 0x614E, 0, 0), (0x5678, 0x1234));
        assert_eq!(run(0x5F, 0, 0x1234, 0x5678, 0, 0), (0x614E, 0x00BC));
        assert_eq!(run(0x5E, 0, 0x05F5, 0xE0FF, 0, 0), (0x9999, 0x9999));
    }

    #[test]
    fn bcd_arithmetic_carries_between_digits() {
        assert_eq!(run(0x58, 1, 0x0999, 0x0001, 0, 0), (0x1000, 0));
        assert_eq!(run(0x58, 1, 0x9999, 0x0001, 0, 0), (0x0000, 1));
        assert_eq!(run(0x5A, 0, 0x0000, 0x0001, 0, 0).0, 0x9999);
        assert_eq!(run(0x5B, 0, 0x0000, 0x0001, 0, 0), (0x9999, 0xFFFF));
    }

    #[test]
    fn atan2_sectors_follow_the_axes() {
        assert_eq!(run(0x38, 0, 100, 0, 0, 0).0, 0);
        assert_eq!(run(0x38, 0, 0, 100, 0, 0).0, 4);
        assert_eq!(run(0x38, 0, 0xFF9C, 0, 0, 0).0, 8);
        assert_eq!(run(0x38, 0, 0, 0xFF9C, 0, 0).0, 12);
        assert_eq!(run(0x38, 0, 100, 100, 0, 0).0, 2);
    }
}
