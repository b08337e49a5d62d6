use crate::known_faces::KnownFaces;
use crate::Embedding;

/// One flag per known encoding: is it within `tolerance` of `probe`.
pub fn compare_faces(known: &[Embedding], probe: &Embedding, tolerance: f32) -> Vec<bool> {
    known
        .iter()
        .map(|k| k.distance(probe) <= tolerance)
        .collect()
}

/// Count votes per name, in order of first appearance.
pub fn tally<'a, I>(names: I) -> Vec<(&'a str, usize)>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: Vec<(&str, usize)> = Vec::new();
    for name in names {
        match counts.iter_mut().find(|(n, _)| *n == name) {
            Some((_, c)) => *c += 1,
            None => counts.push((name, 1)),
        }
    }
    counts
}

/// Name with the most votes. Ties go to the name counted first.
pub fn most_voted<'a>(counts: &[(&'a str, usize)]) -> Option<&'a str> {
    counts
        .iter()
        .fold(None, |best: Option<(&str, usize)>, &(name, count)| match best {
            Some((_, top)) if top >= count => best,
            _ => Some((name, count)),
        })
        .map(|(name, _)| name)
}

/// Resolve `probe` to a known name, or `None` when nothing is within tolerance.
pub fn identify<'a>(known: &'a KnownFaces, probe: &Embedding, tolerance: f32) -> Option<&'a str> {
    let matches = compare_faces(known.encodings(), probe, tolerance);
    let voters = matches
        .iter()
        .zip(known.names())
        .filter(|(hit, _)| **hit)
        .map(|(_, name)| name.as_str());
    most_voted(&tally(voters))
}
