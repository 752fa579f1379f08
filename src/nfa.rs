use crate::array::Array;
use crate::deque::Deque;
use crate::regex;
use crate::regex::PatternError;
use crate::regex::PatternErrorKind;
use crate::regex::Token;
use crate::string::ByteString;

/// Compiled pattern: a Thompson NFA with tagged capture states and a
/// preference-ordered simulation.
///
/// The whole input must match; there is no leftmost scan. Capture groups are
/// numbered by opening parenthesis, left to right.
#[derive(Debug)]
pub struct Nfa {
	states: Array<State>,
	start: StateIdx,
	accept: StateIdx,
	tag_count: usize,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StateIdx(usize);

impl StateIdx {
	/// Placeholder for an out-edge that construction has not connected yet;
	/// none may survive into a finished [`Nfa`].
	const UNPATCHED: Self = Self(usize::MAX);
}

/// `Split` tries `out1` before `out2`; greedy quantifiers put the repeat arm
/// on `out1`, lazy ones put the skip there.
#[derive(Debug, Clone, Copy)]
pub enum State {
	Literal { byte: u8, out: StateIdx },
	Split { out1: StateIdx, out2: StateIdx },
	Tag { id: usize, is_start: bool, out: StateIdx },
	Accept,
}

/// Byte offsets of one capture group, `start..end`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Span {
	pub start: usize,
	pub end: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct MatchResult {
	/// One entry per capture group in tag order; `None` for groups the
	/// winning thread never passed through.
	pub captures: Vec<Option<Span>>,
}

impl Nfa {
	pub fn compile(pattern: &[u8]) -> Result<Self, PatternError<'_>> {
		let postfix: Vec<Token> = regex::parse(pattern)?;
		Builder::new().build(&postfix).map_err(|kind| PatternError {
			consumed: pattern,
			remaining: b"",
			kind,
		})
	}

	pub fn state_count(&self) -> usize {
		self.states.len()
	}

	pub fn capture_count(&self) -> usize {
		self.tag_count
	}

	pub fn is_match(&self, input: &[u8]) -> bool {
		self.exec(input).is_some()
	}

	/// Runs the tagged simulation over the whole input.
	pub fn exec(&self, input: &[u8]) -> Option<MatchResult> {
		let mut current: ThreadSet = ThreadSet::new(self.states.len());
		let mut next: ThreadSet = ThreadSet::new(self.states.len());
		let mut worklist: Deque<(StateIdx, Thread)> = Deque::new();

		let initial: Thread = Thread {
			trail: ByteString::new(),
			tags: vec![TagSpan { start: None, end: None }; self.tag_count],
		};
		self.close(&mut current, &mut worklist, self.start, initial, 0);

		for (pos, &byte) in input.iter().enumerate() {
			debug!("=== step {pos}, byte {byte}");

			next.clear();
			for slot in 0..self.states.len() {
				if !current.visited[slot] {
					continue;
				}
				if let State::Literal { byte: wanted, out } = self.states[slot] {
					if wanted == byte {
						let thread: Thread = current.table[slot].clone().unwrap();
						self.close(&mut next, &mut worklist, out, thread, pos + 1);
					}
				}
			}

			std::mem::swap(&mut current, &mut next);

			if current.is_empty() {
				debug!("=== all threads died at {pos}");
				return None;
			}
		}

		let thread: &Thread = match &current.table[self.accept.0] {
			Some(thread) if current.visited[self.accept.0] => thread,
			_ => return None,
		};
		debug!("=== got match, trail {:?}", thread.trail);

		let captures: Vec<Option<Span>> = thread
			.tags
			.iter()
			.map(|span| match (span.start, span.end) {
				(Some(start), Some(end)) => Some(Span { start, end }),
				_ => None,
			})
			.collect();
		Some(MatchResult { captures })
	}

	/// ε-closure with preference order.
	///
	/// Every thread records a byte per split it crossed (1 for the preferred
	/// arm, 0 for the alternate). On state re-entry the incoming thread only
	/// replaces the resident if its trail dominates; a shared prefix never
	/// dominates, which also terminates closure around ε-cycles (a looping
	/// thread re-arrives with the resident's own trail extended).
	fn close(
		&self,
		set: &mut ThreadSet,
		worklist: &mut Deque<(StateIdx, Thread)>,
		state: StateIdx,
		thread: Thread,
		pos: usize,
	) {
		worklist.push_back((state, thread));

		while let Some((state, thread)) = worklist.pop_back() {
			let slot: usize = state.0;

			if set.visited[slot] {
				let resident: &Thread = set.table[slot].as_ref().unwrap();
				if !dominates(&thread.trail, &resident.trail) {
					continue;
				}
				debug!("evicting thread at state {slot}");
			}
			set.visited[slot] = true;
			set.table[slot] = Some(thread.clone());

			match self.states[slot] {
				State::Split { out1, out2 } => {
					let mut preferred: Thread = thread.clone();
					preferred.trail.push(1);
					let mut alternate: Thread = thread;
					alternate.trail.push(0);
					worklist.push_back((out2, alternate));
					worklist.push_back((out1, preferred));
				},
				State::Tag { id, is_start, out } => {
					let mut tagged: Thread = thread;
					if is_start {
						tagged.tags[id].start = Some(pos);
					} else {
						tagged.tags[id].end = Some(pos);
					}
					worklist.push_back((out, tagged));
				},
				State::Literal { .. } | State::Accept => {},
			}
		}
	}
}

impl std::ops::Index<StateIdx> for Nfa {
	type Output = State;

	fn index(&self, i: StateIdx) -> &Self::Output {
		&self.states[i.0]
	}
}

/// `new` wins only where the first differing split choice favours it; equal
/// prefixes of any lengths leave the resident in place.
fn dominates(new: &ByteString, old: &ByteString) -> bool {
	for (a, b) in new.as_bytes().iter().zip(old.as_bytes()) {
		if a != b {
			return a > b;
		}
	}
	false
}

#[derive(Debug, Clone)]
struct Thread {
	trail: ByteString,
	tags: Vec<TagSpan>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct TagSpan {
	start: Option<usize>,
	end: Option<usize>,
}

/// Presence bitmap plus per-state thread table, both sized `|states|`.
struct ThreadSet {
	visited: Vec<bool>,
	table: Vec<Option<Thread>>,
}

impl ThreadSet {
	fn new(states: usize) -> Self {
		Self {
			visited: vec![false; states],
			table: (0..states).map(|_| None).collect(),
		}
	}

	fn clear(&mut self) {
		self.visited.fill(false);
		self.table.fill_with(|| None);
	}

	fn is_empty(&self) -> bool {
		!self.visited.iter().any(|&visited| visited)
	}
}

/// A partially-built automaton piece: its entry state plus the out-edges
/// still waiting for a target.
struct Fragment {
	start: StateIdx,
	dangling: Array<OutSlot>,
}

#[derive(Debug, Clone, Copy)]
struct OutSlot {
	state: StateIdx,
	arm: Arm,
}

#[derive(Debug, Clone, Copy)]
enum Arm {
	/// `out` of a literal or tag, `out1` of a split.
	Primary,
	/// `out2` of a split.
	Secondary,
}

struct Builder {
	states: Array<State>,
	fragments: Vec<Fragment>,
	open_groups: Vec<OpenGroup>,
	next_tag: usize,
}

struct OpenGroup {
	tag: usize,
	fragments_below: usize,
}

impl Builder {
	fn new() -> Self {
		Self {
			states: Array::new(),
			fragments: Vec::new(),
			open_groups: Vec::new(),
			next_tag: 0,
		}
	}

	fn build(mut self, postfix: &[Token]) -> Result<Nfa, PatternErrorKind> {
		for &token in postfix {
			match token {
				Token::Literal(byte) => self.literal(byte),
				Token::OpenGroup => self.open_group(),
				Token::CloseGroup => self.close_group()?,
				Token::Concatenate => self.concatenate()?,
				Token::Alternate => self.alternate()?,
				Token::ZeroOrOne { lazy } => self.zero_or_one(lazy)?,
				Token::ZeroOrMore { lazy } => self.zero_or_more(lazy)?,
				Token::OneOrMore { lazy } => self.one_or_more(lazy)?,
			}
		}

		if self.fragments.len() != 1 {
			return Err(PatternErrorKind::MissingOperand);
		}
		let fragment: Fragment = self.fragments.pop().unwrap();

		let accept: StateIdx = self.new_state(State::Accept);
		self.patch_all(&fragment.dangling, accept);

		Ok(Nfa {
			states: self.states,
			start: fragment.start,
			accept,
			tag_count: self.next_tag,
		})
	}

	fn literal(&mut self, byte: u8) {
		let state: StateIdx = self.new_state(State::Literal {
			byte,
			out: StateIdx::UNPATCHED,
		});
		self.push_fragment(state, &[OutSlot { state, arm: Arm::Primary }]);
	}

	fn open_group(&mut self) {
		let tag: usize = self.next_tag;
		self.next_tag += 1;

		self.open_groups.push(OpenGroup {
			tag,
			fragments_below: self.fragments.len(),
		});

		let state: StateIdx = self.new_state(State::Tag {
			id: tag,
			is_start: true,
			out: StateIdx::UNPATCHED,
		});
		self.push_fragment(state, &[OutSlot { state, arm: Arm::Primary }]);
	}

	fn close_group(&mut self) -> Result<(), PatternErrorKind> {
		let group: OpenGroup = self.open_groups.pop().ok_or(PatternErrorKind::UnbalancedGroup)?;
		// Exactly the start-tag fragment and one fully-reduced inner
		// fragment may sit above the recorded depth.
		if self.fragments.len() != group.fragments_below + 2 {
			return Err(PatternErrorKind::MissingOperand);
		}

		let inner: Fragment = self.fragments.pop().unwrap();
		let start_tag: Fragment = self.fragments.pop().unwrap();

		self.patch_all(&start_tag.dangling, inner.start);

		let end_state: StateIdx = self.new_state(State::Tag {
			id: group.tag,
			is_start: false,
			out: StateIdx::UNPATCHED,
		});
		self.patch_all(&inner.dangling, end_state);

		self.push_fragment(start_tag.start, &[OutSlot {
			state: end_state,
			arm: Arm::Primary,
		}]);
		Ok(())
	}

	fn concatenate(&mut self) -> Result<(), PatternErrorKind> {
		let (first, second): (Fragment, Fragment) = self.pop_two()?;
		self.patch_all(&first.dangling, second.start);
		self.fragments.push(Fragment {
			start: first.start,
			dangling: second.dangling,
		});
		Ok(())
	}

	fn alternate(&mut self) -> Result<(), PatternErrorKind> {
		let (first, second): (Fragment, Fragment) = self.pop_two()?;
		let split: StateIdx = self.new_state(State::Split {
			out1: first.start,
			out2: second.start,
		});

		let mut dangling: Array<OutSlot> = first.dangling;
		for &slot in second.dangling.iter() {
			dangling.push(slot);
		}
		self.fragments.push(Fragment { start: split, dangling });
		Ok(())
	}

	fn zero_or_one(&mut self, lazy: bool) -> Result<(), PatternErrorKind> {
		let inner: Fragment = self.pop_one()?;
		let (split, skip_arm): (StateIdx, Arm) = self.quantifier_split(inner.start, lazy);

		let mut dangling: Array<OutSlot> = inner.dangling;
		dangling.push(OutSlot {
			state: split,
			arm: skip_arm,
		});
		self.fragments.push(Fragment { start: split, dangling });
		Ok(())
	}

	fn zero_or_more(&mut self, lazy: bool) -> Result<(), PatternErrorKind> {
		let inner: Fragment = self.pop_one()?;
		let (split, skip_arm): (StateIdx, Arm) = self.quantifier_split(inner.start, lazy);

		self.patch_all(&inner.dangling, split);
		self.push_fragment(split, &[OutSlot {
			state: split,
			arm: skip_arm,
		}]);
		Ok(())
	}

	fn one_or_more(&mut self, lazy: bool) -> Result<(), PatternErrorKind> {
		let inner: Fragment = self.pop_one()?;
		let (split, skip_arm): (StateIdx, Arm) = self.quantifier_split(inner.start, lazy);

		self.patch_all(&inner.dangling, split);
		self.push_fragment(inner.start, &[OutSlot {
			state: split,
			arm: skip_arm,
		}]);
		Ok(())
	}

	/// The split behind every quantifier: greedy prefers re-entering the
	/// inner fragment (`out1`), lazy prefers skipping past it. Returns the
	/// split and the arm left dangling for the continuation.
	fn quantifier_split(&mut self, inner_start: StateIdx, lazy: bool) -> (StateIdx, Arm) {
		if lazy {
			let split: StateIdx = self.new_state(State::Split {
				out1: StateIdx::UNPATCHED,
				out2: inner_start,
			});
			(split, Arm::Primary)
		} else {
			let split: StateIdx = self.new_state(State::Split {
				out1: inner_start,
				out2: StateIdx::UNPATCHED,
			});
			(split, Arm::Secondary)
		}
	}

	fn new_state(&mut self, state: State) -> StateIdx {
		let idx: StateIdx = StateIdx(self.states.len());
		self.states.push(state);
		idx
	}

	fn push_fragment(&mut self, start: StateIdx, dangling: &[OutSlot]) {
		let mut list: Array<OutSlot> = Array::with_capacity(dangling.len());
		for &slot in dangling {
			list.push(slot);
		}
		self.fragments.push(Fragment { start, dangling: list });
	}

	fn pop_one(&mut self) -> Result<Fragment, PatternErrorKind> {
		self.fragments.pop().ok_or(PatternErrorKind::MissingOperand)
	}

	fn pop_two(&mut self) -> Result<(Fragment, Fragment), PatternErrorKind> {
		let second: Fragment = self.pop_one()?;
		let first: Fragment = self.pop_one()?;
		Ok((first, second))
	}

	fn patch_all(&mut self, dangling: &Array<OutSlot>, target: StateIdx) {
		for &slot in dangling.iter() {
			match (&mut self.states[slot.state.0], slot.arm) {
				(State::Literal { out, .. }, Arm::Primary) => *out = target,
				(State::Tag { out, .. }, Arm::Primary) => *out = target,
				(State::Split { out1, .. }, Arm::Primary) => *out1 = target,
				(State::Split { out2, .. }, Arm::Secondary) => *out2 = target,
				(state, arm) => unreachable!("no such out-edge: {state:?} {arm:?}"),
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;

	fn spans(result: &MatchResult) -> Vec<Option<(usize, usize)>> {
		result
			.captures
			.iter()
			.map(|capture| capture.map(|span| (span.start, span.end)))
			.collect()
	}

	#[test]
	fn literal_sequences() {
		let nfa: Nfa = Nfa::compile(b"abc").unwrap();
		assert!(nfa.is_match(b"abc"));
		assert!(!nfa.is_match(b"ab"));
		assert!(!nfa.is_match(b"abcd"));
		assert!(!nfa.is_match(b""));
	}

	#[test]
	fn escaped_metacharacters() {
		let nfa: Nfa = Nfa::compile(br"a\*b").unwrap();
		assert!(nfa.is_match(b"a*b"));
		assert!(!nfa.is_match(b"ab"));
	}

	#[test]
	fn alternation_and_quantifiers() {
		let nfa: Nfa = Nfa::compile(b"ab|cd").unwrap();
		assert!(nfa.is_match(b"ab"));
		assert!(nfa.is_match(b"cd"));
		assert!(!nfa.is_match(b"ad"));

		let nfa: Nfa = Nfa::compile(b"a*").unwrap();
		assert!(nfa.is_match(b""));
		assert!(nfa.is_match(b"aaaa"));
		assert!(!nfa.is_match(b"aab"));

		let nfa: Nfa = Nfa::compile(b"a?").unwrap();
		assert!(nfa.is_match(b""));
		assert!(nfa.is_match(b"a"));
		assert!(!nfa.is_match(b"aa"));
	}

	#[test]
	fn scenario_1_quantifier_chain() {
		let nfa: Nfa = Nfa::compile(b"a?b+c").unwrap();
		let result: MatchResult = nfa.exec(b"bbbbc").unwrap();
		assert_eq!(result.captures.len(), 0);
	}

	#[test]
	fn scenario_2_lazy_plus_cedes_to_group() {
		let nfa: Nfa = Nfa::compile(b"a+?(a*)").unwrap();
		let result: MatchResult = nfa.exec(b"aaa").unwrap();
		assert_eq!(spans(&result), vec![Some((1, 3))]);
	}

	#[test]
	fn scenario_3_greedy_group_takes_all() {
		let nfa: Nfa = Nfa::compile(b"(a+)a*").unwrap();
		let result: MatchResult = nfa.exec(b"aaa").unwrap();
		assert_eq!(spans(&result), vec![Some((0, 3))]);
	}

	#[test]
	fn scenario_4_adjacent_groups() {
		let nfa: Nfa = Nfa::compile(b"a*(b+)(c+)").unwrap();
		let result: MatchResult = nfa.exec(b"aaabc").unwrap();
		assert_eq!(spans(&result), vec![Some((3, 4)), Some((4, 5))]);
	}

	#[test]
	fn scenario_5_adjacent_groups_widen() {
		let nfa: Nfa = Nfa::compile(b"a*(b+)(c+)").unwrap();
		let result: MatchResult = nfa.exec(b"aaabbcc").unwrap();
		assert_eq!(spans(&result), vec![Some((3, 5)), Some((5, 7))]);
	}

	#[test]
	fn scenario_6_no_match() {
		let nfa: Nfa = Nfa::compile(b"a|b").unwrap();
		assert_eq!(nfa.exec(b"c"), None);
	}

	#[test]
	fn skipped_group_reports_no_span() {
		let nfa: Nfa = Nfa::compile(b"(a)?b").unwrap();

		let result: MatchResult = nfa.exec(b"ab").unwrap();
		assert_eq!(spans(&result), vec![Some((0, 1))]);

		let result: MatchResult = nfa.exec(b"b").unwrap();
		assert_eq!(spans(&result), vec![None]);
	}

	#[test]
	fn lazy_and_greedy_accept_the_same_language() {
		let greedy: Nfa = Nfa::compile(b"a*b").unwrap();
		let lazy: Nfa = Nfa::compile(b"a*?b").unwrap();
		for input in [b"b".as_slice(), b"ab", b"aaab", b"a", b"ba"] {
			assert_eq!(greedy.is_match(input), lazy.is_match(input));
		}
	}

	#[test]
	fn nested_groups_number_by_opening_paren() {
		let nfa: Nfa = Nfa::compile(b"((a)b)").unwrap();
		assert_eq!(nfa.capture_count(), 2);

		let result: MatchResult = nfa.exec(b"ab").unwrap();
		assert_eq!(spans(&result), vec![Some((0, 2)), Some((0, 1))]);
	}

	#[test]
	fn empty_input_against_optional_pattern() {
		let nfa: Nfa = Nfa::compile(b"a*").unwrap();
		let result: MatchResult = nfa.exec(b"").unwrap();
		assert_eq!(result.captures.len(), 0);
	}

	#[test]
	fn group_under_star_keeps_last_iteration() {
		let nfa: Nfa = Nfa::compile(b"(ab)*").unwrap();
		let result: MatchResult = nfa.exec(b"abab").unwrap();
		assert_eq!(spans(&result), vec![Some((2, 4))]);
	}

	#[test]
	fn malformed_patterns_are_rejected() {
		assert_eq!(
			Nfa::compile(b"*").unwrap_err().kind,
			PatternErrorKind::MissingOperand
		);
		assert_eq!(
			Nfa::compile(b"a|").unwrap_err().kind,
			PatternErrorKind::MissingOperand
		);
		assert_eq!(
			Nfa::compile(b"(a").unwrap_err().kind,
			PatternErrorKind::UnbalancedGroup
		);
		assert_eq!(
			Nfa::compile(br"ab\").unwrap_err().kind,
			PatternErrorKind::DanglingEscape
		);
	}

	#[test]
	fn epsilon_cycle_terminates() {
		// Nested stars close over an ε-cycle; the equal-prefix rule must
		// stop the closure from spinning.
		let nfa: Nfa = Nfa::compile(b"(a*)*b").unwrap();
		assert!(nfa.is_match(b"b"));
		assert!(nfa.is_match(b"aab"));
		assert!(!nfa.is_match(b"aa"));
	}
}
